//! One end-to-end renewal attempt: read, validate, resolve the refresh token, exchange, back up,
//! overwrite, then log.
//!
//! [`RefreshWorkflow::execute`] reports every failure through [`RefreshOutcome::Failed`]; only
//! cancellation surfaces as `Err`. The three steps that follow a successful exchange (backup,
//! overwrite, ledger append) run back to back without cancellation checks, so a stored token is
//! always logged unless the ledger itself fails.

mod metrics;

pub use metrics::RefreshMetrics;

// std
use std::time::Duration as StdDuration;
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	config::Settings,
	error::{self, ConfigError},
	ledger::{RefreshAttemptRecord, RefreshLedger},
	notify::Notifier,
	oauth::TokenEndpoint,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::{CredentialStore, StoreError},
};

/// Knobs consumed by the workflow.
#[derive(Clone, Debug)]
pub struct WorkflowSettings {
	/// Renew when the token expires within this many days.
	pub lead_days: u32,
	/// Fallback refresh token used while the ledger holds no successful exchange.
	pub initial_refresh_token: Option<TokenSecret>,
	/// Treat a token whose expiration cannot be decoded as due.
	pub refresh_when_unreadable: bool,
	/// Upper bound on each notification.
	pub notify_timeout: StdDuration,
}
impl WorkflowSettings {
	/// Extracts the workflow knobs from the keeper settings.
	pub fn from_settings(settings: &Settings) -> Self {
		Self {
			lead_days: settings.days_before_expiration,
			initial_refresh_token: settings.initial_refresh_token.clone(),
			refresh_when_unreadable: settings.refresh_when_unreadable,
			..Default::default()
		}
	}
}
impl Default for WorkflowSettings {
	fn default() -> Self {
		Self {
			lead_days: 7,
			initial_refresh_token: None,
			refresh_when_unreadable: false,
			notify_timeout: StdDuration::from_secs(60),
		}
	}
}

/// Result of one workflow execution; the only value the scheduler observes.
#[derive(Debug)]
pub enum RefreshOutcome {
	/// The stored token is not due for renewal.
	NoRefreshNeeded {
		/// Expiration of the stored token; absent when it cannot be decoded.
		expires_at: Option<OffsetDateTime>,
	},
	/// A new access token was stored and logged.
	Refreshed {
		/// Expiration of the new token.
		expires_at: OffsetDateTime,
	},
	/// The attempt failed; the next cycle tries again.
	Failed {
		/// Human-readable summary.
		message: String,
		/// Underlying error, when one exists.
		cause: Option<Error>,
	},
}
impl RefreshOutcome {
	/// Returns `true` for [`RefreshOutcome::Failed`].
	pub fn is_failed(&self) -> bool {
		matches!(self, Self::Failed { .. })
	}

	fn flow_outcome(&self) -> FlowOutcome {
		match self {
			Self::NoRefreshNeeded { .. } => FlowOutcome::Skipped,
			Self::Refreshed { .. } => FlowOutcome::Refreshed,
			Self::Failed { .. } => FlowOutcome::Failure,
		}
	}
}
impl Display for RefreshOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::NoRefreshNeeded { expires_at: Some(expires_at) } =>
				write!(f, "no refresh needed; token expires at {expires_at}"),
			Self::NoRefreshNeeded { expires_at: None } =>
				f.write_str("no refresh needed; token expiration unknown"),
			Self::Refreshed { expires_at } =>
				write!(f, "token refreshed; new token expires at {expires_at}"),
			Self::Failed { message, cause: Some(cause) } =>
				write!(f, "{message} ({})", error::chain_message(cause)),
			Self::Failed { message, cause: None } => f.write_str(message),
		}
	}
}

/// Orchestrates a single refresh attempt against one store/ledger pair.
///
/// Concurrent callers sharing an instance are serialized; separate instances (or processes)
/// pointing at the same files are not.
pub struct RefreshWorkflow {
	store: Arc<dyn CredentialStore>,
	ledger: Arc<dyn RefreshLedger>,
	endpoint: Arc<dyn TokenEndpoint>,
	notifier: Arc<dyn Notifier>,
	settings: WorkflowSettings,
	singleflight: AsyncMutex<()>,
	metrics: RefreshMetrics,
}
impl RefreshWorkflow {
	/// Wires the workflow to its collaborators.
	pub fn new(
		store: Arc<dyn CredentialStore>,
		ledger: Arc<dyn RefreshLedger>,
		endpoint: Arc<dyn TokenEndpoint>,
		notifier: Arc<dyn Notifier>,
		settings: WorkflowSettings,
	) -> Self {
		Self {
			store,
			ledger,
			endpoint,
			notifier,
			settings,
			singleflight: AsyncMutex::new(()),
			metrics: RefreshMetrics::default(),
		}
	}

	/// Active workflow settings.
	pub fn settings(&self) -> &WorkflowSettings {
		&self.settings
	}

	/// Execution counters.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.metrics
	}

	/// Runs one refresh attempt.
	///
	/// Returns `Err` only with [`Error::Cancelled`]; every other failure is reported as
	/// [`RefreshOutcome::Failed`].
	pub async fn execute(&self, cancel: &CancellationToken) -> Result<RefreshOutcome> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, "execute");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);
		self.metrics.record_attempt();

		let result = span.instrument(self.execute_serialized(cancel)).await;
		let outcome = match &result {
			Ok(outcome) => outcome.flow_outcome(),
			Err(_) => FlowOutcome::Cancelled,
		};

		match outcome {
			FlowOutcome::Refreshed => self.metrics.record_refreshed(),
			FlowOutcome::Skipped => self.metrics.record_skipped(),
			FlowOutcome::Failure => self.metrics.record_failure(),
			_ => {},
		}

		obs::record_flow_outcome(KIND, outcome);

		result
	}

	async fn execute_serialized(&self, cancel: &CancellationToken) -> Result<RefreshOutcome> {
		let _singleflight = tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(Error::Cancelled),
			guard = self.singleflight.lock() => guard,
		};
		let credential = match self.store.read().await {
			Ok(credential) => credential,
			Err(e) => {
				tracing::error!(error = %e, "Failed to read the stored credential.");

				return Ok(RefreshOutcome::Failed {
					message: "Failed to read the stored credential.".into(),
					cause: Some(e.into()),
				});
			},
		};

		ensure_active(cancel)?;

		let now = OffsetDateTime::now_utc();
		let expires_at = credential.expires_at();
		let due = match expires_at {
			Some(_) => credential.should_refresh(self.settings.lead_days, now),
			None => {
				tracing::warn!(
					refresh_when_unreadable = self.settings.refresh_when_unreadable,
					"Stored access token has no readable expiration."
				);

				self.settings.refresh_when_unreadable
			},
		};

		if !due {
			tracing::info!(
				expires_at = ?expires_at,
				lead_days = self.settings.lead_days,
				"Access token is not due for renewal."
			);

			return Ok(RefreshOutcome::NoRefreshNeeded { expires_at });
		}

		tracing::info!(expires_at = ?expires_at, "Access token is due for renewal.");

		let refresh_token = match self.resolve_refresh_token().await {
			Ok(Some(refresh_token)) => refresh_token,
			Ok(None) => {
				let cause = Error::MissingRefreshToken;

				return Ok(self.fail(cause.to_string(), Some(cause)).await);
			},
			Err(e) =>
				return Ok(self
					.fail("Failed to look up the latest refresh token.", Some(e.into()))
					.await),
		};

		ensure_active(cancel)?;

		let exchanged = tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(Error::Cancelled),
			result = self.endpoint.exchange(refresh_token.expose()) => result,
		};
		let issued_at = OffsetDateTime::now_utc();
		let exchanged = exchanged.and_then(|grant| {
			let expires_at =
				issued_at.checked_add(grant.expires_in).ok_or(ConfigError::ExpiresInOutOfRange)?;

			Ok((grant, expires_at))
		});
		let (grant, expires_at) = match exchanged {
			Ok(exchanged) => exchanged,
			Err(e) => {
				let message = format!("Token exchange failed: {}", error::chain_message(&e));
				let record = RefreshAttemptRecord::failure(refresh_token, message.clone(), issued_at)
					.with_status(e.status());

				if let Err(append) = self.ledger.append(record).await {
					tracing::error!(error = %append, "Failed to record the failed exchange.");
				}

				return Ok(self.fail(message, Some(e)).await);
			},
		};

		if let Err(e) = self.store.backup().await {
			return Ok(self.fail_storage("Failed to back up the credential store.", e).await);
		}
		if let Err(e) = self.store.write(grant.access_token.expose()).await {
			return Ok(self.fail_storage("Failed to write the new access token.", e).await);
		}

		let record = RefreshAttemptRecord::success(
			refresh_token,
			grant.refresh_token,
			grant.access_token,
			expires_at,
			issued_at,
		)
		.with_status(grant.status);

		if let Err(e) = self.ledger.append(record).await {
			return Ok(self
				.fail_storage("The new access token was stored but could not be logged.", e)
				.await);
		}

		tracing::info!(%expires_at, "Access token refreshed.");

		self.notify_success(expires_at).await;

		Ok(RefreshOutcome::Refreshed { expires_at })
	}

	async fn resolve_refresh_token(&self) -> Result<Option<TokenSecret>, StoreError> {
		if let Some(latest) =
			self.ledger.latest_successful_refresh_token().await?.filter(|secret| !secret.is_blank())
		{
			return Ok(Some(latest));
		}

		let fallback =
			self.settings.initial_refresh_token.clone().filter(|secret| !secret.is_blank());

		if fallback.is_some() {
			tracing::info!("Ledger holds no refresh token; using the configured initial token.");
		}

		Ok(fallback)
	}

	async fn fail_storage(&self, message: &str, err: StoreError) -> RefreshOutcome {
		self.fail(message, Some(err.into())).await
	}

	async fn fail(&self, message: impl Into<String>, cause: Option<Error>) -> RefreshOutcome {
		let message = message.into();

		match &cause {
			Some(cause) =>
				tracing::error!(cause = %error::chain_message(cause), "{message}"),
			None => tracing::error!("{message}"),
		}

		let notify = self.notifier.notify_failure(&message, cause.as_ref());

		if tokio::time::timeout(self.settings.notify_timeout, notify).await.is_err() {
			tracing::warn!("Failure notification timed out.");
		}

		RefreshOutcome::Failed { message, cause }
	}

	async fn notify_success(&self, expires_at: OffsetDateTime) {
		let notify = self.notifier.notify_success(expires_at);

		if tokio::time::timeout(self.settings.notify_timeout, notify).await.is_err() {
			tracing::warn!("Success notification timed out.");
		}
	}
}
impl Debug for RefreshWorkflow {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshWorkflow")
			.field("settings", &self.settings)
			.field("metrics", &self.metrics)
			.finish_non_exhaustive()
	}
}

fn ensure_active(cancel: &CancellationToken) -> Result<()> {
	if cancel.is_cancelled() { Err(Error::Cancelled) } else { Ok(()) }
}
