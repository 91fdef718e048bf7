//! JSON-lines [`RefreshLedger`] that appends one fsynced line per attempt.

// std
use std::{
	fs::{self, OpenOptions},
	io::Write,
};
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	ledger::{self, RefreshAttemptRecord, RefreshLedger},
	store::{StoreError, StoreFuture},
};

/// Append-only ledger stored as newline-delimited JSON.
#[derive(Clone, Debug)]
pub struct FileLedger {
	path: PathBuf,
	append_guard: Arc<Mutex<()>>,
}
impl FileLedger {
	/// Opens (or prepares) a ledger at `path`, creating parent directories eagerly.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create ledger directory {}: {e}", parent.display()),
			})?;
		}

		Ok(Self { path, append_guard: Default::default() })
	}

	/// Path of the ledger file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Loads every readable record, oldest first. Unparseable lines are skipped with a warning.
	pub fn records(&self) -> Result<Vec<RefreshAttemptRecord>, StoreError> {
		if !self.path.exists() {
			return Ok(Vec::new());
		}

		let contents = fs::read_to_string(&self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", self.path.display()),
		})?;
		let mut records = Vec::new();

		for (idx, line) in contents.lines().enumerate().filter(|(_, line)| !line.trim().is_empty()) {
			match serde_json::from_str::<RefreshAttemptRecord>(line) {
				Ok(record) => records.push(record),
				Err(e) => tracing::warn!(
					path = %self.path.display(),
					line = idx + 1,
					error = %e,
					"Skipping unreadable ledger line."
				),
			}
		}

		Ok(records)
	}

	fn append_now(&self, record: &RefreshAttemptRecord) -> Result<(), StoreError> {
		let mut line = serde_json::to_string(record).map_err(ledger::serialization_error)?;

		line.push('\n');

		let _guard = self.append_guard.lock();
		let mut file = OpenOptions::new().create(true).append(true).open(&self.path).map_err(|e| {
			StoreError::Backend { message: format!("Failed to open {}: {e}", self.path.display()) }
		})?;

		file.write_all(line.as_bytes()).map_err(|e| StoreError::Backend {
			message: format!("Failed to append to {}: {e}", self.path.display()),
		})?;
		file.sync_all().map_err(|e| StoreError::Backend {
			message: format!("Failed to sync {}: {e}", self.path.display()),
		})
	}
}
impl RefreshLedger for FileLedger {
	fn latest_successful_refresh_token(&self) -> StoreFuture<'_, Option<TokenSecret>> {
		Box::pin(async move { Ok(ledger::latest_refresh_token(&self.records()?)) })
	}

	fn append(&self, record: RefreshAttemptRecord) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			self.append_now(&record)?;

			tracing::info!(
				succeeded = record.succeeded,
				expires_at = %record.expires_at,
				"Refresh attempt appended to ledger."
			);

			Ok(())
		})
	}
}
