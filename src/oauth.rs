//! Token endpoint seam and its `oauth2`-backed implementation.
//!
//! The keeper only ever performs one request: a `refresh_token` grant authenticated with HTTP
//! Basic client credentials. [`OAuthTokenEndpoint`] drives that request through the `oauth2`
//! crate's [`BasicClient`] and folds every failure (transport, protocol, deserialization) into a
//! single keeper [`Error`].

pub use oauth2;

// crates.io
use oauth2::{
	ClientId, ClientSecret, EndpointNotSet, EndpointSet, HttpClientError, RefreshToken,
	RequestTokenError, TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicErrorResponseType, BasicRequestTokenError},
};
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	error::{ConfigError, TransientError, TransportError},
	http::{ResponseMetadata, ResponseMetadataSlot, RetryPolicy, TokenHttpClient},
};
#[cfg(feature = "reqwest")] use crate::{config::Settings, http::ReqwestHttpClient};

type ConfiguredBasicClient =
	BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;
type EndpointTokenResponse = oauth2::basic::BasicTokenResponse;

/// Boxed future returned by [`TokenEndpoint`] implementations.
pub type EndpointFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Remote token endpoint able to exchange a refresh token for a new access token.
pub trait TokenEndpoint
where
	Self: Send + Sync,
{
	/// Performs one `refresh_token` grant.
	fn exchange<'a>(&'a self, refresh_token: &'a str) -> EndpointFuture<'a, TokenGrant>;
}

/// Successful token endpoint response.
#[derive(Clone, Debug)]
pub struct TokenGrant {
	/// Newly issued access token.
	pub access_token: TokenSecret,
	/// Rotated refresh token, when the provider issued one.
	pub refresh_token: Option<TokenSecret>,
	/// Lifetime of the access token; always positive.
	pub expires_in: Duration,
	/// HTTP status of the response that carried the grant.
	pub status: Option<u16>,
}

/// [`TokenEndpoint`] backed by the `oauth2` crate and a [`TokenHttpClient`] transport.
pub struct OAuthTokenEndpoint<C>
where
	C: ?Sized + TokenHttpClient,
{
	oauth_client: ConfiguredBasicClient,
	http_client: Arc<C>,
}
impl<C> OAuthTokenEndpoint<C>
where
	C: ?Sized + TokenHttpClient,
{
	/// Builds an endpoint posting to `token_endpoint` with HTTP Basic client authentication.
	pub fn new(
		token_endpoint: &Url,
		client_id: &str,
		client_secret: &TokenSecret,
		http_client: impl Into<Arc<C>>,
	) -> Result<Self> {
		let token_url = TokenUrl::new(token_endpoint.to_string())
			.map_err(|source| ConfigError::InvalidEndpoint { source })?;
		let oauth_client = BasicClient::new(ClientId::new(client_id.to_owned()))
			.set_client_secret(ClientSecret::new(client_secret.expose().to_owned()))
			.set_token_uri(token_url);

		Ok(Self { oauth_client, http_client: http_client.into() })
	}

	/// Token endpoint URL requests are posted to.
	pub fn token_url(&self) -> &str {
		self.oauth_client.token_uri().as_str()
	}
}
#[cfg(feature = "reqwest")]
impl OAuthTokenEndpoint<ReqwestHttpClient> {
	/// Builds the reqwest-backed endpoint described by `settings`.
	pub fn from_settings(settings: &Settings) -> Result<Self> {
		let http_client = ReqwestHttpClient::new(settings.http.timeout())?
			.with_retry_policy(settings.http.retry_policy());

		Self::new(
			&settings.token_endpoint,
			&settings.basic_auth.username,
			&settings.basic_auth.password,
			http_client,
		)
	}
}
impl<C> TokenEndpoint for OAuthTokenEndpoint<C>
where
	C: ?Sized + TokenHttpClient,
{
	fn exchange<'a>(&'a self, refresh_token: &'a str) -> EndpointFuture<'a, TokenGrant> {
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let instrumented = self.http_client.with_metadata(meta.clone());
			let refresh_secret = RefreshToken::new(refresh_token.to_owned());
			let response = self
				.oauth_client
				.exchange_refresh_token(&refresh_secret)
				.request_async(&instrumented)
				.await
				.map_err(|err| map_request_error(meta.take(), err))?;

			let meta = meta.take();

			if let Some(meta) = meta.as_ref().filter(|meta| meta.attempts > 1) {
				tracing::info!(attempts = meta.attempts, "Token endpoint succeeded after retrying.");
			}

			map_token_response(response, meta_status(meta.as_ref()), OffsetDateTime::now_utc())
		})
	}
}

fn map_token_response(
	response: EndpointTokenResponse,
	status: Option<u16>,
	now: OffsetDateTime,
) -> Result<TokenGrant> {
	let expires_in = response.expires_in().ok_or(ConfigError::MissingExpiresIn)?.as_secs();
	let expires_in = i64::try_from(expires_in).map_err(|_| ConfigError::ExpiresInOutOfRange)?;

	if expires_in <= 0 {
		return Err(ConfigError::NonPositiveExpiresIn.into());
	}

	let expires_in = Duration::seconds(expires_in);

	// The expiration instant must stay representable.
	if now.checked_add(expires_in).is_none() {
		return Err(ConfigError::ExpiresInOutOfRange.into());
	}

	Ok(TokenGrant {
		access_token: TokenSecret::new(response.access_token().secret().to_owned()),
		refresh_token: response
			.refresh_token()
			.map(|token| TokenSecret::new(token.secret().to_owned()))
			.filter(|secret| !secret.is_blank()),
		expires_in,
		status,
	})
}

fn map_request_error<E>(
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<E>>,
) -> Error
where
	E: 'static + Send + Sync + StdError,
{
	let meta_ref = meta.as_ref();

	match err {
		RequestTokenError::ServerResponse(response) => map_server_response_error(response, meta_ref),
		RequestTokenError::Request(error) => map_transport_error(meta_ref, error),
		RequestTokenError::Parse(error, _body) =>
			TransientError::TokenResponseParse { source: error, status: meta_status(meta_ref) }
				.into(),
		RequestTokenError::Other(message) => TransientError::TokenEndpoint {
			message,
			status: meta_status(meta_ref),
			retry_after: meta_retry_after(meta_ref),
		}
		.into(),
	}
}

fn map_server_response_error(
	response: BasicErrorResponse,
	meta: Option<&ResponseMetadata>,
) -> Error {
	let code = response.error().as_ref().to_owned();
	let reason = match response.error_description() {
		Some(description) => format!("{code} ({description})"),
		None => code,
	};
	let transient = match response.error() {
		BasicErrorResponseType::Extension(code) =>
			matches!(code.as_str(), "server_error" | "temporarily_unavailable" | "slow_down"),
		_ => false,
	} || meta_status(meta).is_some_and(RetryPolicy::is_retryable_status);

	if transient {
		TransientError::TokenEndpoint {
			message: reason,
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		}
		.into()
	} else {
		Error::Rejected { reason, status: meta_status(meta) }
	}
}

fn map_transport_error<E>(meta: Option<&ResponseMetadata>, err: HttpClientError<E>) -> Error
where
	E: 'static + Send + Sync + StdError,
{
	match err {
		HttpClientError::Reqwest(inner) => TransportError::network(*inner).into(),
		HttpClientError::Http(inner) => ConfigError::from(inner).into(),
		HttpClientError::Io(inner) => TransportError::Io(inner).into(),
		HttpClientError::Other(message) => TransientError::TokenEndpoint {
			message: format!("HTTP client error: {message}"),
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		}
		.into(),
		_ => TransientError::TokenEndpoint {
			message: "unknown HTTP client error".into(),
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		}
		.into(),
	}
}

fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|value| value.status)
}

fn meta_retry_after(meta: Option<&ResponseMetadata>) -> Option<Duration> {
	meta.and_then(|value| value.retry_after)
}

#[cfg(test)]
mod tests {
	// std
	use std::time::Duration as StdDuration;
	// crates.io
	use oauth2::{AccessToken, EmptyExtraTokenFields, StandardErrorResponse, basic::BasicTokenType};
	// self
	use super::*;

	fn meta(status: u16) -> ResponseMetadata {
		ResponseMetadata { status: Some(status), retry_after: None, attempts: 1 }
	}

	#[cfg(feature = "reqwest")]
	#[test]
	fn builds_basic_auth_endpoint() {
		let url = Url::parse("https://logincert.example.com/anaf-oauth2/v1/token")
			.expect("Failed to parse token endpoint URL.");
		let endpoint = <OAuthTokenEndpoint<ReqwestHttpClient>>::new(
			&url,
			"client-id",
			&TokenSecret::new("client-secret"),
			ReqwestHttpClient::default(),
		)
		.expect("Endpoint should build.");

		assert_eq!(endpoint.token_url(), url.as_str());
	}

	#[test]
	fn invalid_grant_is_rejected() {
		let response = StandardErrorResponse::new(
			BasicErrorResponseType::InvalidGrant,
			Some("refresh token expired".into()),
			None,
		);
		let err = map_server_response_error(response, Some(&meta(400)));

		assert!(matches!(
			&err,
			Error::Rejected { reason, status: Some(400) }
				if reason == "invalid_grant (refresh token expired)"
		));
	}

	#[test]
	fn server_errors_are_transient() {
		let response = StandardErrorResponse::new(
			BasicErrorResponseType::Extension("temporarily_unavailable".into()),
			None,
			None,
		);

		assert!(matches!(
			map_server_response_error(response, Some(&meta(400))),
			Error::Transient(TransientError::TokenEndpoint { status: Some(400), .. })
		));

		let response =
			StandardErrorResponse::new(BasicErrorResponseType::InvalidRequest, None, None);

		assert!(matches!(
			map_server_response_error(response, Some(&meta(503))),
			Error::Transient(TransientError::TokenEndpoint { status: Some(503), .. })
		));
	}

	fn token_response(expires_in: Option<u64>) -> EndpointTokenResponse {
		let mut response = EndpointTokenResponse::new(
			AccessToken::new("access".into()),
			BasicTokenType::Bearer,
			EmptyExtraTokenFields {},
		);

		response.set_expires_in(expires_in.map(StdDuration::from_secs).as_ref());

		response
	}

	#[test]
	fn unrepresentable_expiration_is_out_of_range() {
		let now = OffsetDateTime::now_utc();
		let err = map_token_response(token_response(Some(1_000_000_000_000_000)), Some(200), now)
			.expect_err("Huge expires_in should be rejected.");

		assert!(matches!(err, Error::Config(ConfigError::ExpiresInOutOfRange)));

		let grant = map_token_response(token_response(Some(7_776_000)), Some(200), now)
			.expect("A 90-day lifetime should be accepted.");

		assert_eq!(grant.expires_in, Duration::days(90));
		assert_eq!(grant.status, Some(200));
		assert!(matches!(
			map_token_response(token_response(None), Some(200), now),
			Err(Error::Config(ConfigError::MissingExpiresIn))
		));
	}

	#[test]
	fn io_failures_map_to_transport_errors() {
		let err = map_transport_error::<std::io::Error>(
			None,
			HttpClientError::Io(std::io::Error::other("connection reset")),
		);

		assert!(matches!(err, Error::Transport(TransportError::Io(_))));
	}
}
