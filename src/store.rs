//! Credential store contract and built-in store implementations.

pub mod file;
pub mod memory;

pub use file::FileCredentialStore;
pub use memory::MemoryCredentialStore;

// self
use crate::{_prelude::*, auth::Credential};

/// Boxed future returned by store and ledger operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Narrow read/write/backup contract over the place the active access credential lives.
///
/// The store owns the on-disk format; callers only assume it holds one opaque access token value
/// that can be replaced.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Reads the currently active credential.
	fn read(&self) -> StoreFuture<'_, Credential>;

	/// Replaces the stored access token with `access_token`.
	fn write<'a>(&'a self, access_token: &'a str) -> StoreFuture<'a, ()>;

	/// Copies the current contents aside. A no-op when nothing exists yet.
	fn backup(&self) -> StoreFuture<'_, ()>;
}

/// Error type produced by [`CredentialStore`] and [`crate::ledger::RefreshLedger`]
/// implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// The backing file or record does not exist.
	#[error("Not found: {message}.")]
	NotFound {
		/// Human-readable error payload.
		message: String,
	},
	/// The backing data exists but does not contain what was expected.
	#[error("Malformed contents: {message}.")]
	Malformed {
		/// Human-readable error payload.
		message: String,
	},
	/// Serialization failures (e.g., serde_json) surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
