//! Append-only refresh-history ledger: one record per attempted exchange.

pub mod file;
pub mod memory;

pub use file::FileLedger;
pub use memory::MemoryLedger;

// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	store::{StoreError, StoreFuture},
};

/// Durable history of refresh attempts.
pub trait RefreshLedger
where
	Self: Send + Sync,
{
	/// Refresh token to use next, taken from the most recent successful record.
	fn latest_successful_refresh_token(&self) -> StoreFuture<'_, Option<TokenSecret>>;

	/// Appends one attempt record.
	fn append(&self, record: RefreshAttemptRecord) -> StoreFuture<'_, ()>;
}

/// One attempted exchange, successful or not.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshAttemptRecord {
	/// Refresh token sent to the endpoint.
	pub refresh_token_used: TokenSecret,
	/// Refresh token returned by the endpoint, when it rotated the old one.
	#[serde(default)]
	pub issued_refresh_token: Option<TokenSecret>,
	/// New access token; empty on failure.
	pub resulting_access_token: TokenSecret,
	/// Expiry of the new access token; the attempt instant on failure.
	#[serde(with = "time::serde::rfc3339")]
	pub expires_at: OffsetDateTime,
	/// When the record was created.
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
	/// Whether the exchange succeeded.
	pub succeeded: bool,
	/// Failure description; present iff `succeeded` is `false`.
	#[serde(default)]
	pub error_message: Option<String>,
	/// HTTP status of the token endpoint response, when one was received.
	#[serde(default)]
	pub status: Option<u16>,
}
impl RefreshAttemptRecord {
	/// Record for a successful exchange.
	pub fn success(
		refresh_token_used: impl Into<TokenSecret>,
		issued_refresh_token: Option<TokenSecret>,
		resulting_access_token: impl Into<TokenSecret>,
		expires_at: OffsetDateTime,
		created_at: OffsetDateTime,
	) -> Self {
		Self {
			refresh_token_used: refresh_token_used.into(),
			issued_refresh_token,
			resulting_access_token: resulting_access_token.into(),
			expires_at,
			created_at,
			succeeded: true,
			error_message: None,
			status: None,
		}
	}

	/// Record for a failed exchange.
	pub fn failure(
		refresh_token_used: impl Into<TokenSecret>,
		error_message: impl Into<String>,
		created_at: OffsetDateTime,
	) -> Self {
		Self {
			refresh_token_used: refresh_token_used.into(),
			issued_refresh_token: None,
			resulting_access_token: TokenSecret::new(String::new()),
			expires_at: created_at,
			created_at,
			succeeded: false,
			error_message: Some(error_message.into()),
			status: None,
		}
	}

	/// Attaches the token endpoint's HTTP status.
	pub fn with_status(mut self, status: Option<u16>) -> Self {
		self.status = status;

		self
	}

	/// Refresh token a later cycle should present, if this record succeeded.
	pub fn next_refresh_token(&self) -> Option<&TokenSecret> {
		if !self.succeeded {
			return None;
		}

		self.issued_refresh_token
			.as_ref()
			.filter(|secret| !secret.is_blank())
			.or(Some(&self.refresh_token_used))
			.filter(|secret| !secret.is_blank())
	}
}
impl Debug for RefreshAttemptRecord {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshAttemptRecord")
			.field("refresh_token_used", &"<redacted>")
			.field("issued_refresh_token", &self.issued_refresh_token.as_ref().map(|_| "<redacted>"))
			.field("resulting_access_token", &"<redacted>")
			.field("expires_at", &self.expires_at)
			.field("created_at", &self.created_at)
			.field("succeeded", &self.succeeded)
			.field("error_message", &self.error_message)
			.field("status", &self.status)
			.finish()
	}
}

/// Picks the refresh token carried by the newest successful record; later entries win ties.
pub(crate) fn latest_refresh_token<'a>(
	records: impl IntoIterator<Item = &'a RefreshAttemptRecord>,
) -> Option<TokenSecret> {
	let mut latest: Option<&RefreshAttemptRecord> = None;

	for record in records.into_iter().filter(|record| record.next_refresh_token().is_some()) {
		if latest.is_none_or(|current| record.created_at >= current.created_at) {
			latest = Some(record);
		}
	}

	latest.and_then(RefreshAttemptRecord::next_refresh_token).cloned()
}

pub(crate) fn serialization_error(err: impl Display) -> StoreError {
	StoreError::Serialization { message: format!("Failed to encode ledger record: {err}") }
}
