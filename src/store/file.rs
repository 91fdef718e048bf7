//! Text-file [`CredentialStore`] that keeps the access token in one marked `[section]`.
//!
//! The file is shared with the third-party client that consumes the token, so everything outside
//! the token section is preserved byte for byte. The section body runs from the line after the
//! header up to the next line that starts with `[` (or the end of the file) and is trimmed on read.

// std
use std::{
	fs::{self, File, OpenOptions},
	io::{self, Write},
	ops::Range,
};
// crates.io
use time::{format_description::BorrowedFormatItem, macros::format_description};
// self
use crate::{
	_prelude::*,
	auth::Credential,
	store::{CredentialStore, StoreError, StoreFuture},
};

const BACKUP_STAMP: &[BorrowedFormatItem<'static>] =
	format_description!("[year][month][day]_[hour][minute][second]");

/// Persists the access token inside a flat text file and copies it aside before overwrites.
#[derive(Clone, Debug)]
pub struct FileCredentialStore {
	path: PathBuf,
	backup_dir: PathBuf,
	section: String,
}
impl FileCredentialStore {
	/// Section name read by the downstream client (spelling included).
	pub const DEFAULT_SECTION: &'static str = "AcessToken";

	/// Creates a store over `path`, writing backups into `backup_dir`.
	pub fn new(path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			backup_dir: backup_dir.into(),
			section: Self::DEFAULT_SECTION.into(),
		}
	}

	/// Overrides the section name holding the token (without brackets).
	pub fn with_section(mut self, section: impl Into<String>) -> Self {
		self.section = section.into();

		self
	}

	/// Path of the credential file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Directory receiving backups.
	pub fn backup_dir(&self) -> &Path {
		&self.backup_dir
	}

	fn header(&self) -> String {
		format!("[{}]", self.section)
	}

	fn load(&self) -> Result<String, StoreError> {
		if !self.path.exists() {
			return Err(StoreError::NotFound {
				message: format!("credential file {} does not exist", self.path.display()),
			});
		}

		fs::read_to_string(&self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", self.path.display()),
		})
	}

	fn locate(&self, contents: &str) -> Result<Range<usize>, StoreError> {
		section_body(contents, &self.header()).ok_or_else(|| StoreError::Malformed {
			message: format!("section {} not found in {}", self.header(), self.path.display()),
		})
	}

	fn persist(&self, contents: &str) -> Result<(), StoreError> {
		let file_name =
			self.path.file_name().map(|name| name.to_string_lossy()).unwrap_or_default();
		let tmp_path = self.path.with_file_name(format!(".{file_name}.tmp"));

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(contents.as_bytes()).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}

	fn backup_now(&self) -> Result<Option<PathBuf>, StoreError> {
		if !self.path.exists() {
			tracing::warn!(path = %self.path.display(), "Credential file not found; skipping backup.");

			return Ok(None);
		}

		fs::create_dir_all(&self.backup_dir).map_err(|e| StoreError::Backend {
			message: format!("Failed to create backup directory {}: {e}", self.backup_dir.display()),
		})?;

		let stamp = OffsetDateTime::now_utc().format(BACKUP_STAMP).map_err(|e| {
			StoreError::Backend { message: format!("Failed to format backup timestamp: {e}") }
		})?;
		let target = self.backup_dir.join(format!("bak_config_ini_{stamp}.txt"));
		let mut source = File::open(&self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to open {}: {e}", self.path.display()),
		})?;
		let mut backup = OpenOptions::new().write(true).create_new(true).open(&target).map_err(
			|e| StoreError::Backend { message: format!("Failed to create {}: {e}", target.display()) },
		)?;

		io::copy(&mut source, &mut backup).map_err(|e| StoreError::Backend {
			message: format!("Failed to copy into {}: {e}", target.display()),
		})?;
		backup.sync_all().map_err(|e| StoreError::Backend {
			message: format!("Failed to sync {}: {e}", target.display()),
		})?;

		Ok(Some(target))
	}
}
impl CredentialStore for FileCredentialStore {
	fn read(&self) -> StoreFuture<'_, Credential> {
		Box::pin(async move {
			let contents = self.load()?;
			let body = self.locate(&contents)?;
			let token = contents[body].trim();

			if token.is_empty() {
				return Err(StoreError::Malformed {
					message: format!("section {} in {} is empty", self.header(), self.path.display()),
				});
			}

			tracing::debug!(path = %self.path.display(), "Access token read from credential file.");

			Ok(Credential::new(token))
		})
	}

	fn write<'a>(&'a self, access_token: &'a str) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			let contents = self.load()?;
			let body = self.locate(&contents)?;
			let updated = replace_body(&contents, body, access_token.trim());

			self.persist(&updated)?;

			tracing::info!(path = %self.path.display(), "Credential file updated with new access token.");

			Ok(())
		})
	}

	fn backup(&self) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			if let Some(target) = self.backup_now()? {
				tracing::info!(backup = %target.display(), "Credential file backed up.");
			}

			Ok(())
		})
	}
}

/// Byte range of the body that follows `header`, or `None` if the header line is absent.
fn section_body(contents: &str, header: &str) -> Option<Range<usize>> {
	let mut offset = 0;
	let mut start = None;

	for line in contents.split_inclusive('\n') {
		match start {
			None if line.trim() == header => start = Some(offset + line.len()),
			Some(begin) if line.starts_with('[') => return Some(begin..offset),
			_ => {},
		}

		offset += line.len();
	}

	start.map(|begin| begin..contents.len())
}

fn replace_body(contents: &str, body: Range<usize>, token: &str) -> String {
	let newline = if contents.contains("\r\n") { "\r\n" } else { "\n" };
	let old = &contents[body.clone()];
	let trailing = &old[old.trim_end().len()..];
	let mut updated = String::with_capacity(contents.len() + token.len());

	updated.push_str(&contents[..body.start]);

	if !updated.is_empty() && !updated.ends_with('\n') {
		updated.push_str(newline);
	}

	updated.push_str(token);

	if trailing.contains('\n') {
		updated.push_str(trailing);
	} else if body.end < contents.len() || contents.ends_with('\n') {
		updated.push_str(newline);
	}

	updated.push_str(&contents[body.end..]);

	updated
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// self
	use super::*;

	const CONFIG: &str = "[Server]\nHost=api.example.test\n\n[AcessToken]\nold.jwt.value\n\n[Other]\nKey=Value\n";

	fn temp_dir(label: &str) -> PathBuf {
		let unique = format!(
			"oauth2_token_keeper_{label}_{}_{}",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);
		let dir = env::temp_dir().join(unique);

		fs::create_dir_all(&dir).expect("Failed to create temporary test directory.");

		dir
	}

	fn store_with(dir: &Path, contents: Option<&str>) -> FileCredentialStore {
		let path = dir.join("config.ini");

		if let Some(contents) = contents {
			fs::write(&path, contents).expect("Failed to seed credential file.");
		}

		FileCredentialStore::new(path, dir.join("backups"))
	}

	#[tokio::test]
	async fn read_extracts_token_between_sections() {
		let dir = temp_dir("read");
		let store = store_with(&dir, Some(CONFIG));
		let credential = store.read().await.expect("Credential should be readable.");

		assert_eq!(credential.access_token.expose(), "old.jwt.value");

		fs::remove_dir_all(&dir).expect("Failed to clean up test directory.");
	}

	#[tokio::test]
	async fn read_trims_whitespace_and_handles_crlf() {
		let dir = temp_dir("read_crlf");
		let store = store_with(&dir, Some("[AcessToken]\r\n   spaced.jwt.value  \r\n"));
		let credential = store.read().await.expect("Credential should be readable.");

		assert_eq!(credential.access_token.expose(), "spaced.jwt.value");

		fs::remove_dir_all(&dir).expect("Failed to clean up test directory.");
	}

	#[tokio::test]
	async fn read_reports_missing_file_and_section() {
		let dir = temp_dir("read_missing");
		let missing = store_with(&dir, None);
		let err = missing.read().await.expect_err("Missing file should fail to read.");

		assert!(matches!(err, StoreError::NotFound { .. }));

		let no_section = store_with(&dir, Some("[Server]\nHost=x\n"));
		let err = no_section.read().await.expect_err("Missing section should fail to read.");

		assert!(matches!(err, StoreError::Malformed { .. }));

		let empty = store_with(&dir, Some("[AcessToken]\n\n[Other]\n"));
		let err = empty.read().await.expect_err("Empty section should fail to read.");

		assert!(matches!(err, StoreError::Malformed { .. }));

		fs::remove_dir_all(&dir).expect("Failed to clean up test directory.");
	}

	#[tokio::test]
	async fn write_replaces_only_the_token_section() {
		let dir = temp_dir("write");
		let store = store_with(&dir, Some(CONFIG));

		store.write("new.jwt.value").await.expect("Credential write should succeed.");

		let contents = fs::read_to_string(store.path()).expect("Failed to read credential file.");

		assert_eq!(
			contents,
			"[Server]\nHost=api.example.test\n\n[AcessToken]\nnew.jwt.value\n\n[Other]\nKey=Value\n"
		);
		assert_eq!(
			store.read().await.expect("Credential should be readable.").access_token.expose(),
			"new.jwt.value"
		);

		fs::remove_dir_all(&dir).expect("Failed to clean up test directory.");
	}

	#[tokio::test]
	async fn write_handles_section_at_end_of_file() {
		let dir = temp_dir("write_tail");
		let store = store_with(&dir, Some("[Server]\nHost=x\n[AcessToken]\nold"));

		store.write("fresh").await.expect("Credential write should succeed.");

		let contents = fs::read_to_string(store.path()).expect("Failed to read credential file.");

		assert_eq!(contents, "[Server]\nHost=x\n[AcessToken]\nfresh");

		fs::remove_dir_all(&dir).expect("Failed to clean up test directory.");
	}

	#[tokio::test]
	async fn write_leaves_sibling_files_alone() {
		let dir = temp_dir("write_sibling");
		let store = store_with(&dir, Some(CONFIG));
		let sibling = dir.join("config.tmp");

		fs::write(&sibling, "unrelated").expect("Failed to seed sibling file.");
		store.write("new.jwt.value").await.expect("Credential write should succeed.");

		assert_eq!(fs::read_to_string(&sibling).expect("Sibling should survive."), "unrelated");
		assert!(!dir.join(".config.ini.tmp").exists());

		let mut names = fs::read_dir(&dir)
			.expect("Test directory should be readable.")
			.map(|entry| {
				entry.expect("Entry should be readable.").file_name().to_string_lossy().into_owned()
			})
			.collect::<Vec<_>>();

		names.sort();

		assert_eq!(names, ["config.ini", "config.tmp"]);

		fs::remove_dir_all(&dir).expect("Failed to clean up test directory.");
	}

	#[tokio::test]
	async fn backup_copies_file_and_skips_when_missing() {
		let dir = temp_dir("backup");
		let missing = store_with(&dir, None);

		missing.backup().await.expect("Backup of a missing file should be a no-op.");

		assert!(!missing.backup_dir().exists());

		let store = store_with(&dir, Some(CONFIG));

		store.backup().await.expect("Backup should succeed.");

		let backups = fs::read_dir(store.backup_dir())
			.expect("Backup directory should exist.")
			.map(|entry| entry.expect("Backup entry should be readable.").path())
			.collect::<Vec<_>>();

		assert_eq!(backups.len(), 1);
		assert!(
			backups[0]
				.file_name()
				.and_then(|name| name.to_str())
				.is_some_and(|name| name.starts_with("bak_config_ini_") && name.ends_with(".txt"))
		);
		assert_eq!(
			fs::read_to_string(&backups[0]).expect("Failed to read backup."),
			CONFIG,
		);

		fs::remove_dir_all(&dir).expect("Failed to clean up test directory.");
	}

	#[test]
	fn section_body_stops_at_next_header() {
		let body = section_body(CONFIG, "[AcessToken]").expect("Section should be found.");

		assert_eq!(&CONFIG[body], "old.jwt.value\n\n");
		assert!(section_body(CONFIG, "[Missing]").is_none());
	}
}
