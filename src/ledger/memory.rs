//! Thread-safe in-memory [`RefreshLedger`] for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	ledger::{self, RefreshAttemptRecord, RefreshLedger},
	store::StoreFuture,
};

/// In-process ledger keeping records in insertion order.
#[derive(Clone, Debug, Default)]
pub struct MemoryLedger(Arc<RwLock<Vec<RefreshAttemptRecord>>>);
impl MemoryLedger {
	/// Creates a ledger pre-populated with `records`.
	pub fn with_records(records: impl IntoIterator<Item = RefreshAttemptRecord>) -> Self {
		Self(Arc::new(RwLock::new(records.into_iter().collect())))
	}

	/// Snapshot of every appended record, oldest first.
	pub fn records(&self) -> Vec<RefreshAttemptRecord> {
		self.0.read().clone()
	}
}
impl RefreshLedger for MemoryLedger {
	fn latest_successful_refresh_token(&self) -> StoreFuture<'_, Option<TokenSecret>> {
		let records = self.0.clone();

		Box::pin(async move { Ok(ledger::latest_refresh_token(records.read().iter())) })
	}

	fn append(&self, record: RefreshAttemptRecord) -> StoreFuture<'_, ()> {
		let records = self.0.clone();

		Box::pin(async move {
			records.write().push(record);

			Ok(())
		})
	}
}
