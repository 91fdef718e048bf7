//! Transport primitives for the refresh-token exchange.
//!
//! [`TokenHttpClient`] is the keeper's only dependency on an HTTP stack. Implementations hand out
//! short-lived [`AsyncHttpClient`] handles that publish [`ResponseMetadata`] into a
//! [`ResponseMetadataSlot`], so the endpoint adapter can classify failures with the status and
//! Retry-After hint of the final response.
//!
//! The reqwest-backed client is also the resilience layer: transient failures (connect or timeout
//! errors, HTTP 408/429/5xx) are retried with exponential backoff inside a single
//! [`AsyncHttpClient::call`]. The refresh workflow itself never retries.

// std
#[cfg(feature = "reqwest")] use std::ops::Deref;
use std::time::Duration as StdDuration;
// crates.io
use oauth2::{AsyncHttpClient, HttpClientError};
#[cfg(feature = "reqwest")] use oauth2::{HttpRequest, HttpResponse};
#[cfg(feature = "reqwest")] use reqwest::{
	header::{HeaderMap, RETRY_AFTER},
	redirect::Policy,
};
#[cfg(feature = "reqwest")] use time::format_description::well_known::Rfc2822;
// self
use crate::_prelude::*;
#[cfg(feature = "reqwest")] use crate::error::ConfigError;

/// Abstraction over HTTP transports capable of executing the token exchange while publishing
/// response metadata.
///
/// Implementations must be `Send + Sync + 'static` so the workflow can share them, and the handles
/// they return must own whatever state is required so their request futures remain `Send`.
pub trait TokenHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Concrete error emitted by the underlying transport.
	type TransportError: 'static + Send + Sync + StdError;

	/// [`AsyncHttpClient`] handle tied to a [`ResponseMetadataSlot`].
	type Handle: for<'c> AsyncHttpClient<
			'c,
			Error = HttpClientError<Self::TransportError>,
			Future: 'c + Send,
		>
		+ 'static
		+ Send
		+ Sync;

	/// Builds an [`AsyncHttpClient`] handle that records outcomes in `slot`.
	///
	/// Call [`ResponseMetadataSlot::take`] before submitting the request so stale information
	/// never leaks across attempts, and [`ResponseMetadataSlot::store`] once a response is known.
	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle;
}

/// Captures metadata from the most recent HTTP response for downstream error mapping.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadata {
	/// HTTP status code returned by the token endpoint, if available.
	pub status: Option<u16>,
	/// Retry-After hint expressed as a relative duration.
	pub retry_after: Option<Duration>,
	/// Number of transport attempts made, including the first one.
	pub attempts: u32,
}

/// Thread-safe slot for sharing [`ResponseMetadata`] between transport and error layers.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Stores new metadata for the current request.
	pub fn store(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Returns the captured metadata, if any, consuming it from the slot.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

/// Exponential backoff applied to transient transport failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Retries after the first attempt; `0` disables retrying.
	pub max_retries: u32,
	/// Delay before the first retry; doubled for each further retry.
	pub base_delay: StdDuration,
}
impl RetryPolicy {
	const MAX_DELAY: StdDuration = StdDuration::from_secs(60);

	/// Policy that never retries.
	pub const fn none() -> Self {
		Self { max_retries: 0, base_delay: StdDuration::ZERO }
	}

	/// Delay before retry number `retry` (zero-based), stretched to honor a Retry-After hint and
	/// capped at one minute.
	pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> StdDuration {
		let factor = 1_u32.checked_shl(retry).unwrap_or(u32::MAX);
		let backoff = self.base_delay.saturating_mul(factor);
		let hinted = retry_after.and_then(|hint| StdDuration::try_from(hint).ok()).unwrap_or_default();

		backoff.max(hinted).min(Self::MAX_DELAY)
	}

	/// Statuses treated as transient: request timeout, throttling, and server errors.
	pub fn is_retryable_status(status: u16) -> bool {
		matches!(status, 408 | 429 | 500..=599)
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self { max_retries: 3, base_delay: StdDuration::from_secs(2) }
	}
}

/// Thin wrapper around [`ReqwestClient`] carrying the retry policy.
///
/// Token requests should not follow redirects; [`ReqwestHttpClient::new`] disables them and sets
/// the request timeout that bounds each attempt.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestHttpClient {
	client: ReqwestClient,
	retry: RetryPolicy,
}
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Builds a client with a per-attempt `timeout` and redirects disabled.
	pub fn new(timeout: StdDuration) -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder().timeout(timeout).redirect(Policy::none()).build()?;

		Ok(Self::with_client(client))
	}

	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self { client, retry: RetryPolicy::default() }
	}

	/// Overrides the retry policy.
	pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;

		self
	}

	/// Active retry policy.
	pub fn retry_policy(&self) -> RetryPolicy {
		self.retry
	}

	/// Builds an instrumented HTTP client that captures response metadata.
	pub(crate) fn instrumented(&self, slot: ResponseMetadataSlot) -> InstrumentedHandle {
		InstrumentedHandle::new(self.client.clone(), self.retry, slot)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.client
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.client
	}
}
#[cfg(feature = "reqwest")]
impl TokenHttpClient for ReqwestHttpClient {
	type Handle = InstrumentedHandle;
	type TransportError = ReqwestError;

	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
		self.instrumented(slot)
	}
}

#[cfg(feature = "reqwest")]
/// Instrumented adapter that implements [`AsyncHttpClient`] for reqwest.
pub(crate) struct InstrumentedHttpClient {
	client: ReqwestClient,
	retry: RetryPolicy,
	slot: ResponseMetadataSlot,
}

#[cfg(feature = "reqwest")]
/// Public handle returned by [`ReqwestHttpClient`] that satisfies [`TokenHttpClient`].
#[derive(Clone)]
pub struct InstrumentedHandle(Arc<InstrumentedHttpClient>);
#[cfg(feature = "reqwest")]
impl InstrumentedHandle {
	fn new(client: ReqwestClient, retry: RetryPolicy, slot: ResponseMetadataSlot) -> Self {
		Self(Arc::new(InstrumentedHttpClient { client, retry, slot }))
	}
}
#[cfg(feature = "reqwest")]
impl<'c> AsyncHttpClient<'c> for InstrumentedHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		let client = Arc::clone(&self.0);

		Box::pin(async move {
			client.slot.take();

			let mut retry = 0;

			loop {
				let attempt: reqwest::Request =
					duplicate_request(&request).try_into().map_err(Box::new)?;

				match client.client.execute(attempt).await {
					Ok(response) => {
						let status = response.status();
						let headers = response.headers().to_owned();
						let retry_after = parse_retry_after(&headers);

						client.slot.store(ResponseMetadata {
							status: Some(status.as_u16()),
							retry_after,
							attempts: retry + 1,
						});

						if RetryPolicy::is_retryable_status(status.as_u16())
							&& retry < client.retry.max_retries
						{
							let delay = client.retry.delay_for(retry, retry_after);

							drop(response);
							tracing::warn!(
								status = status.as_u16(),
								retry = retry + 1,
								delay_ms = delay.as_millis() as u64,
								"Token endpoint returned a transient status; retrying."
							);
							tokio::time::sleep(delay).await;

							retry += 1;

							continue;
						}

						let mut response_new =
							HttpResponse::new(response.bytes().await.map_err(Box::new)?.to_vec());

						*response_new.status_mut() = status;
						*response_new.headers_mut() = headers;

						return Ok(response_new);
					},
					Err(err) if is_transient(&err) && retry < client.retry.max_retries => {
						let delay = client.retry.delay_for(retry, None);

						tracing::warn!(
							error = %err,
							retry = retry + 1,
							delay_ms = delay.as_millis() as u64,
							"Token endpoint request failed; retrying."
						);
						tokio::time::sleep(delay).await;

						retry += 1;
					},
					Err(err) => {
						client.slot.store(ResponseMetadata {
							status: err.status().map(|code| code.as_u16()),
							retry_after: None,
							attempts: retry + 1,
						});

						return Err(HttpClientError::Reqwest(Box::new(err)));
					},
				}
			}
		})
	}
}

#[cfg(feature = "reqwest")]
fn duplicate_request(request: &HttpRequest) -> HttpRequest {
	let mut copy = HttpRequest::new(request.body().clone());

	*copy.method_mut() = request.method().clone();
	*copy.uri_mut() = request.uri().clone();
	*copy.headers_mut() = request.headers().clone();
	*copy.version_mut() = request.version();

	copy
}

#[cfg(feature = "reqwest")]
fn is_transient(err: &ReqwestError) -> bool {
	err.is_timeout() || err.is_connect()
}

#[cfg(feature = "reqwest")]
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(Duration::seconds(secs as i64));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}
