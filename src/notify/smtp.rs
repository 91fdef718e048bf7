//! SMTP notifier sending HTML + plain-text mail through `lettre`.

// std
use std::time::Duration as StdDuration;
// crates.io
use lettre::{
	AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
	message::{Mailbox, MultiPart, SinglePart, header::ContentType},
	transport::smtp::authentication::Credentials,
};
use time::{format_description::BorrowedFormatItem, macros::format_description};
// self
use crate::{
	_prelude::*,
	config::EmailSettings,
	error::{self, ConfigError},
	notify::{Notifier, NotifyFuture},
};

const STAMP_FORMAT: &[BorrowedFormatItem<'static>] =
	format_description!("[year]-[month]-[day] [hour]:[minute]:[second] UTC");
const SUCCESS_SUBJECT: &str = "Token keeper: access token refreshed";
const FAILURE_SUBJECT: &str = "Token keeper: access token refresh failed";
const SMTPS_PORT: u16 = 465;

/// Mails every notice to the configured recipients.
pub struct SmtpNotifier {
	transport: AsyncSmtpTransport<Tokio1Executor>,
	from: Mailbox,
	recipients: Vec<Mailbox>,
}
impl SmtpNotifier {
	/// Builds the transport and parses every address up front.
	///
	/// Port 465 uses implicit TLS, any other port upgrades with STARTTLS when `enable_ssl` is set.
	/// The connection itself is opened lazily on the first notice.
	pub fn new(settings: &EmailSettings) -> Result<Self, ConfigError> {
		let from = Mailbox::new(
			Some(settings.from_name.clone()).filter(|name| !name.trim().is_empty()),
			settings
				.from_address
				.parse()
				.map_err(|e| ConfigError::invalid("email.from_address", format!("{e}")))?,
		);
		let recipients = settings
			.to_addresses
			.iter()
			.map(|address| address.parse::<Mailbox>())
			.collect::<Result<Vec<_>, _>>()
			.map_err(|e| ConfigError::invalid("email.to_addresses", format!("{e}")))?;
		let builder = match (settings.enable_ssl, settings.smtp_port) {
			(true, SMTPS_PORT) => AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.smtp_server),
			(true, _) => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.smtp_server),
			(false, _) =>
				Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.smtp_server)),
		}
		.map_err(|e| ConfigError::invalid("email.smtp_server", format!("{e}")))?;
		let mut builder = builder.port(settings.smtp_port).timeout(Some(StdDuration::from_secs(30)));

		if !settings.username.trim().is_empty() {
			builder = builder.credentials(Credentials::new(
				settings.username.clone(),
				settings.password.expose().to_owned(),
			));
		}

		tracing::debug!(
			host = %settings.smtp_server,
			port = settings.smtp_port,
			recipients = recipients.len(),
			"SMTP notifier initialized."
		);

		Ok(Self { transport: builder.build(), from, recipients })
	}

	async fn deliver(&self, subject: &str, html: String, text: String) {
		let mut builder = Message::builder().from(self.from.clone()).subject(subject);

		for recipient in &self.recipients {
			builder = builder.to(recipient.clone());
		}

		let message = match builder.multipart(
			MultiPart::alternative()
				.singlepart(SinglePart::builder().header(ContentType::TEXT_PLAIN).body(text))
				.singlepart(SinglePart::builder().header(ContentType::TEXT_HTML).body(html)),
		) {
			Ok(message) => message,
			Err(e) => {
				tracing::warn!(error = %e, subject, "Failed to build notification email.");

				return;
			},
		};

		match self.transport.send(message).await {
			Ok(_) => tracing::info!(subject, "Notification email sent."),
			Err(e) => tracing::warn!(error = %e, subject, "Failed to send notification email."),
		}
	}
}
impl Debug for SmtpNotifier {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SmtpNotifier")
			.field("from", &self.from.to_string())
			.field("recipients", &self.recipients.len())
			.finish()
	}
}
impl Notifier for SmtpNotifier {
	fn notify_success(&self, expires_at: OffsetDateTime) -> NotifyFuture<'_> {
		Box::pin(async move {
			let (html, text) = success_body(OffsetDateTime::now_utc(), expires_at);

			self.deliver(SUCCESS_SUBJECT, html, text).await;
		})
	}

	fn notify_failure<'a>(&'a self, message: &'a str, cause: Option<&'a Error>) -> NotifyFuture<'a> {
		Box::pin(async move {
			let details = cause.map(|cause| error::chain_message(cause));
			let (html, text) = failure_body(OffsetDateTime::now_utc(), message, details.as_deref());

			self.deliver(FAILURE_SUBJECT, html, text).await;
		})
	}
}

fn success_body(now: OffsetDateTime, expires_at: OffsetDateTime) -> (String, String) {
	let now = stamp(now);
	let expires_at = stamp(expires_at);
	let html = format!(
		"<html><body><h2>Access token refreshed</h2>\
		<p>Refreshed at: {now}</p><p>New token expires at: <strong>{expires_at}</strong></p>\
		</body></html>"
	);
	let text = format!("Access token refreshed at {now}.\nNew token expires at {expires_at}.\n");

	(html, text)
}

fn failure_body(now: OffsetDateTime, message: &str, details: Option<&str>) -> (String, String) {
	let now = stamp(now);
	let details_html = details
		.map(|details| format!("<pre>{}</pre>", escape_html(details)))
		.unwrap_or_default();
	let html = format!(
		"<html><body><h2>Access token refresh failed</h2>\
		<p>Failed at: {now}</p><p>{}</p>{details_html}</body></html>",
		escape_html(message),
	);
	let text = match details {
		Some(details) => format!("Access token refresh failed at {now}.\n{message}\n\n{details}\n"),
		None => format!("Access token refresh failed at {now}.\n{message}\n"),
	};

	(html, text)
}

fn stamp(at: OffsetDateTime) -> String {
	at.to_offset(time::UtcOffset::UTC).format(STAMP_FORMAT).unwrap_or_else(|_| at.to_string())
}

fn escape_html(raw: &str) -> String {
	let mut escaped = String::with_capacity(raw.len());

	for c in raw.chars() {
		match c {
			'<' => escaped.push_str("&lt;"),
			'>' => escaped.push_str("&gt;"),
			'&' => escaped.push_str("&amp;"),
			'"' => escaped.push_str("&quot;"),
			_ => escaped.push(c),
		}
	}

	escaped
}
