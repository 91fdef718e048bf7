//! Best-effort outbound notifications about refresh outcomes.
//!
//! Notifier methods return `()`: implementations absorb and log their own failures so a broken
//! mail relay can never change what a refresh cycle reports.

#[cfg(feature = "smtp")] pub mod smtp;
#[cfg(feature = "smtp")] pub use smtp::SmtpNotifier;

// self
use crate::{_prelude::*, error};

/// Boxed future returned by [`Notifier`] implementations.
pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = ()> + 'a + Send>>;

/// Receives success and failure notices from the refresh workflow.
pub trait Notifier
where
	Self: Send + Sync,
{
	/// A new access token valid until `expires_at` was stored.
	fn notify_success(&self, expires_at: OffsetDateTime) -> NotifyFuture<'_>;

	/// A refresh cycle failed with `message`, optionally caused by `cause`.
	fn notify_failure<'a>(&'a self, message: &'a str, cause: Option<&'a Error>) -> NotifyFuture<'a>;
}

/// Notifier that only writes log events; the default when email is not configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;
impl Notifier for LogNotifier {
	fn notify_success(&self, expires_at: OffsetDateTime) -> NotifyFuture<'_> {
		Box::pin(async move {
			tracing::info!(%expires_at, "Access token refreshed.");
		})
	}

	fn notify_failure<'a>(&'a self, message: &'a str, cause: Option<&'a Error>) -> NotifyFuture<'a> {
		Box::pin(async move {
			match cause {
				Some(cause) =>
					tracing::error!(cause = %error::chain_message(cause), "{message}"),
				None => tracing::error!("{message}"),
			}
		})
	}
}

/// Notifier that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotifier;
impl Notifier for NoopNotifier {
	fn notify_success(&self, _: OffsetDateTime) -> NotifyFuture<'_> {
		Box::pin(async {})
	}

	fn notify_failure<'a>(&'a self, _: &'a str, _: Option<&'a Error>) -> NotifyFuture<'a> {
		Box::pin(async {})
	}
}

/// Notice captured by [`MemoryNotifier`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
	/// Success notice.
	Success {
		/// Expiration of the stored token.
		expires_at: OffsetDateTime,
	},
	/// Failure notice.
	Failure {
		/// Human-readable summary.
		message: String,
		/// Rendered cause chain, when a cause was supplied.
		cause: Option<String>,
	},
}

/// In-process notifier that records every notice, for tests and demos.
#[derive(Clone, Debug, Default)]
pub struct MemoryNotifier(Arc<Mutex<Vec<Notification>>>);
impl MemoryNotifier {
	/// Snapshot of the notices received so far, oldest first.
	pub fn notifications(&self) -> Vec<Notification> {
		self.0.lock().clone()
	}

	/// Number of failure notices received.
	pub fn failures(&self) -> usize {
		self.0.lock().iter().filter(|n| matches!(n, Notification::Failure { .. })).count()
	}

	/// Number of success notices received.
	pub fn successes(&self) -> usize {
		self.0.lock().iter().filter(|n| matches!(n, Notification::Success { .. })).count()
	}
}
impl Notifier for MemoryNotifier {
	fn notify_success(&self, expires_at: OffsetDateTime) -> NotifyFuture<'_> {
		Box::pin(async move {
			self.0.lock().push(Notification::Success { expires_at });
		})
	}

	fn notify_failure<'a>(&'a self, message: &'a str, cause: Option<&'a Error>) -> NotifyFuture<'a> {
		Box::pin(async move {
			self.0.lock().push(Notification::Failure {
				message: message.to_owned(),
				cause: cause.map(|cause| error::chain_message(cause)),
			});
		})
	}
}
