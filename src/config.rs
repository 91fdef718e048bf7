//! Immutable keeper settings loaded once at startup from a TOML file.
//!
//! ```toml
//! token_endpoint = "https://logincert.anaf.ro/anaf-oauth2/v1/token"
//! days_before_expiration = 7
//! credential_file = "/srv/client/config.ini"
//! backup_dir = "/srv/client/backups"
//! ledger_file = "/var/lib/token-keeper/ledger.jsonl"
//!
//! [basic_auth]
//! username = "client-id"
//! password = "client-secret"
//!
//! [schedule]
//! kind = "daily"
//! hour = 6
//! minute = 30
//! utc_offset = "+02:00"
//! ```

// std
use std::{fs, net::IpAddr, time::Duration as StdDuration};
// crates.io
use time::{Time, UtcOffset, format_description::BorrowedFormatItem, macros::format_description};
// self
use crate::{
	_prelude::*, auth::TokenSecret, error::ConfigError, http::RetryPolicy, scheduler::Schedule,
	store::FileCredentialStore,
};

const MAX_DAYS_BEFORE_EXPIRATION: u32 = 3_650;
const MAX_INTERVAL_SECS: u64 = 366 * 24 * 60 * 60;
const UTC_OFFSET_FORMAT: &[BorrowedFormatItem<'static>] =
	format_description!("[offset_hour sign:mandatory]:[offset_minute]");

/// Complete keeper configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
	/// Token endpoint receiving the `refresh_token` grant.
	pub token_endpoint: Url,
	/// Static client credentials sent with HTTP Basic authentication.
	pub basic_auth: BasicAuthSettings,
	/// When the keeper wakes up.
	pub schedule: ScheduleSettings,
	/// Lead time, in days, before expiration at which a token is renewed.
	#[serde(default = "default_days_before_expiration")]
	pub days_before_expiration: u32,
	/// Text file holding the access token section.
	pub credential_file: PathBuf,
	/// Section header (without brackets) holding the access token.
	#[serde(default = "default_credential_section")]
	pub credential_section: String,
	/// Directory receiving timestamped copies of the credential file.
	pub backup_dir: PathBuf,
	/// JSON-lines refresh history.
	pub ledger_file: PathBuf,
	/// Refresh token used until the ledger holds a successful exchange.
	#[serde(default)]
	pub initial_refresh_token: Option<TokenSecret>,
	/// Treat a token whose expiration cannot be decoded as due for renewal.
	#[serde(default)]
	pub refresh_when_unreadable: bool,
	/// Run one cycle immediately instead of waiting for the first wake time.
	#[serde(default)]
	pub run_on_start: bool,
	/// Token endpoint transport tuning.
	#[serde(default)]
	pub http: HttpSettings,
	/// Outbound email notifications; absent disables them.
	#[serde(default)]
	pub email: Option<EmailSettings>,
}
impl Settings {
	/// Reads, parses, and validates the TOML file at `path`.
	pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let raw = fs::read_to_string(path)
			.map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;

		Self::from_toml(&raw)
	}

	/// Parses and validates settings from TOML text.
	pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
		let settings = toml::from_str::<Self>(raw)?;

		settings.validate()?;

		Ok(settings)
	}

	/// Rejects values the keeper cannot operate with.
	pub fn validate(&self) -> Result<(), ConfigError> {
		validate_endpoint(&self.token_endpoint)?;

		if self.basic_auth.username.trim().is_empty() {
			return Err(ConfigError::invalid("basic_auth.username", "must not be empty"));
		}
		if self.basic_auth.password.is_blank() {
			return Err(ConfigError::invalid("basic_auth.password", "must not be empty"));
		}
		if self.days_before_expiration > MAX_DAYS_BEFORE_EXPIRATION {
			return Err(ConfigError::invalid(
				"days_before_expiration",
				format!("must be at most {MAX_DAYS_BEFORE_EXPIRATION}"),
			));
		}
		if self.credential_section.trim().is_empty()
			|| self.credential_section.contains(['[', ']', '\n'])
		{
			return Err(ConfigError::invalid(
				"credential_section",
				"must be a bare section name without brackets",
			));
		}
		if self.http.timeout_secs == 0 {
			return Err(ConfigError::invalid("http.timeout_secs", "must be positive"));
		}
		if let Some(email) = &self.email {
			email.validate()?;
		}

		self.schedule.to_schedule().map(|_| ())
	}

	/// Runtime schedule derived from [`Settings::schedule`].
	pub fn schedule(&self) -> Result<Schedule, ConfigError> {
		self.schedule.to_schedule()
	}
}

/// HTTP Basic client credentials.
#[derive(Clone, Debug, Deserialize)]
pub struct BasicAuthSettings {
	/// Client identifier.
	pub username: String,
	/// Client secret.
	pub password: TokenSecret,
}

/// Wake-up schedule as written in the settings file.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleSettings {
	/// Fixed period between cycles.
	Interval {
		/// Seconds between cycles.
		every_secs: u64,
	},
	/// Once a day at a wall-clock time.
	Daily {
		/// Hour of day, `0..=23`.
		hour: u8,
		/// Minute of hour, `0..=59`.
		minute: u8,
		/// Offset of the wall clock from UTC, such as `"+02:00"`; UTC when absent.
		#[serde(default)]
		utc_offset: Option<String>,
	},
}
impl ScheduleSettings {
	/// Validates and converts into a runtime [`Schedule`].
	pub fn to_schedule(&self) -> Result<Schedule, ConfigError> {
		match self {
			Self::Interval { every_secs: 0 } =>
				Err(ConfigError::invalid("schedule.every_secs", "must be positive")),
			Self::Interval { every_secs } if *every_secs > MAX_INTERVAL_SECS =>
				Err(ConfigError::invalid(
					"schedule.every_secs",
					format!("must be at most {MAX_INTERVAL_SECS}"),
				)),
			Self::Interval { every_secs } =>
				Ok(Schedule::Interval(StdDuration::from_secs(*every_secs))),
			Self::Daily { hour, minute, utc_offset } => {
				let at = Time::from_hms(*hour, *minute, 0).map_err(|e| {
					ConfigError::invalid(
						"schedule.hour",
						format!("{hour:02}:{minute:02} is not a time of day ({e})"),
					)
				})?;
				let offset = match utc_offset.as_deref().map(str::trim) {
					None | Some("Z" | "UTC" | "") => UtcOffset::UTC,
					Some(raw) => UtcOffset::parse(raw, UTC_OFFSET_FORMAT).map_err(|e| {
						ConfigError::invalid(
							"schedule.utc_offset",
							format!("`{raw}` is not `+HH:MM` ({e})"),
						)
					})?,
				};

				Ok(Schedule::Daily { at, offset })
			},
		}
	}
}

/// Token endpoint transport tuning.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
	/// Per-attempt request timeout.
	pub timeout_secs: u64,
	/// Retries after the first attempt on transient failures.
	pub max_retries: u32,
	/// Delay before the first retry; doubled for each further retry.
	pub retry_base_delay_ms: u64,
}
impl HttpSettings {
	/// Per-attempt request timeout.
	pub fn timeout(&self) -> StdDuration {
		StdDuration::from_secs(self.timeout_secs)
	}

	/// Retry policy handed to the transport.
	pub fn retry_policy(&self) -> RetryPolicy {
		RetryPolicy {
			max_retries: self.max_retries,
			base_delay: StdDuration::from_millis(self.retry_base_delay_ms),
		}
	}
}
impl Default for HttpSettings {
	fn default() -> Self {
		Self { timeout_secs: 30, max_retries: 3, retry_base_delay_ms: 2_000 }
	}
}

/// SMTP settings for success and failure notifications.
#[derive(Clone, Debug, Deserialize)]
pub struct EmailSettings {
	/// SMTP relay host.
	pub smtp_server: String,
	/// SMTP relay port.
	#[serde(default = "default_smtp_port")]
	pub smtp_port: u16,
	/// SMTP login; anonymous when empty.
	#[serde(default)]
	pub username: String,
	/// SMTP password.
	#[serde(default = "default_smtp_password")]
	pub password: TokenSecret,
	/// Sender address.
	pub from_address: String,
	/// Sender display name.
	#[serde(default = "default_from_name")]
	pub from_name: String,
	/// Recipients of every notification.
	pub to_addresses: Vec<String>,
	/// Use TLS for the SMTP connection.
	#[serde(default = "default_enable_ssl")]
	pub enable_ssl: bool,
}
impl EmailSettings {
	/// Whether enough is configured to send anything.
	pub fn is_configured(&self) -> bool {
		!self.smtp_server.trim().is_empty()
			&& !self.from_address.trim().is_empty()
			&& !self.to_addresses.is_empty()
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.smtp_server.trim().is_empty() {
			return Err(ConfigError::invalid("email.smtp_server", "must not be empty"));
		}
		if self.from_address.trim().is_empty() {
			return Err(ConfigError::invalid("email.from_address", "must not be empty"));
		}
		if self.to_addresses.iter().any(|address| address.trim().is_empty()) {
			return Err(ConfigError::invalid("email.to_addresses", "must not contain empty entries"));
		}

		Ok(())
	}
}

fn validate_endpoint(url: &Url) -> Result<(), ConfigError> {
	match url.scheme() {
		"https" => Ok(()),
		"http" if is_loopback(url) => Ok(()),
		scheme => Err(ConfigError::invalid(
			"token_endpoint",
			format!("scheme `{scheme}` is not allowed; use https"),
		)),
	}
}

fn is_loopback(url: &Url) -> bool {
	match url.host() {
		Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
		Some(url::Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
		Some(url::Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
		None => false,
	}
}

fn default_days_before_expiration() -> u32 {
	7
}

fn default_credential_section() -> String {
	FileCredentialStore::DEFAULT_SECTION.into()
}

fn default_smtp_port() -> u16 {
	587
}

fn default_smtp_password() -> TokenSecret {
	TokenSecret::new(String::new())
}

fn default_from_name() -> String {
	"Token Keeper".into()
}

fn default_enable_ssl() -> bool {
	true
}
