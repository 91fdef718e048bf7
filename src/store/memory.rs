//! Thread-safe in-memory [`CredentialStore`] for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::Credential,
	store::{CredentialStore, StoreError, StoreFuture},
};

#[derive(Debug, Default)]
struct MemoryState {
	current: Option<String>,
	backups: Vec<String>,
	writes: usize,
}

/// In-process credential store that remembers every backup and counts writes.
#[derive(Clone, Debug, Default)]
pub struct MemoryCredentialStore(Arc<RwLock<MemoryState>>);
impl MemoryCredentialStore {
	/// Creates a store already holding `access_token`.
	pub fn with_token(access_token: impl Into<String>) -> Self {
		let store = Self::default();

		store.0.write().current = Some(access_token.into());

		store
	}

	/// Currently stored access token, if any.
	pub fn current(&self) -> Option<String> {
		self.0.read().current.clone()
	}

	/// Snapshots taken by [`CredentialStore::backup`], oldest first.
	pub fn backups(&self) -> Vec<String> {
		self.0.read().backups.clone()
	}

	/// Number of successful [`CredentialStore::write`] calls.
	pub fn write_count(&self) -> usize {
		self.0.read().writes
	}
}
impl CredentialStore for MemoryCredentialStore {
	fn read(&self) -> StoreFuture<'_, Credential> {
		let state = self.0.clone();

		Box::pin(async move {
			state.read().current.clone().map(Credential::new).ok_or_else(|| StoreError::NotFound {
				message: "no credential stored in memory".into(),
			})
		})
	}

	fn write<'a>(&'a self, access_token: &'a str) -> StoreFuture<'a, ()> {
		let state = self.0.clone();
		let access_token = access_token.to_owned();

		Box::pin(async move {
			let mut guard = state.write();

			guard.current = Some(access_token);
			guard.writes += 1;

			Ok(())
		})
	}

	fn backup(&self) -> StoreFuture<'_, ()> {
		let state = self.0.clone();

		Box::pin(async move {
			let mut guard = state.write();

			if let Some(current) = guard.current.clone() {
				guard.backups.push(current);
			}

			Ok(())
		})
	}
}
