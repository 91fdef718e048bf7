#![cfg(feature = "reqwest")]

// std
use std::time::Duration as StdDuration;
// crates.io
use httpmock::prelude::*;
use time::Duration;
// self
use oauth2_token_keeper::{
	auth::TokenSecret,
	error::{ConfigError, Error, TransientError},
	http::{ReqwestHttpClient, RetryPolicy},
	oauth::{OAuthTokenEndpoint, TokenEndpoint},
	reqwest::Client,
	url::Url,
};

const BASIC_AUTH: &str = "Basic Y2xpZW50LWlkOmNsaWVudC1zZWNyZXQ=";

fn endpoint(server: &MockServer, max_retries: u32) -> OAuthTokenEndpoint<ReqwestHttpClient> {
	let url = Url::parse(&server.url("/token")).expect("Mock token endpoint should parse.");
	let http_client = ReqwestHttpClient::with_client(Client::new())
		.with_retry_policy(RetryPolicy { max_retries, base_delay: StdDuration::from_millis(10) });

	OAuthTokenEndpoint::new(&url, "client-id", &TokenSecret::new("client-secret"), http_client)
		.expect("Token endpoint should build.")
}

#[tokio::test]
async fn exchange_returns_rotated_grant() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/token")
				.header("authorization", BASIC_AUTH)
				.header("content-type", "application/x-www-form-urlencoded");
			then.status(200)
				.header("content-type", "application/json")
				.body(
					"{\"access_token\":\"access-new\",\"refresh_token\":\"refresh-new\",\"token_type\":\"Bearer\",\"expires_in\":7776000}",
				);
		})
		.await;
	let grant = endpoint(&server, 0)
		.exchange("seed-token")
		.await
		.expect("Exchange should succeed.");

	mock.assert_async().await;

	assert_eq!(grant.access_token.expose(), "access-new");
	assert_eq!(grant.refresh_token.as_ref().map(TokenSecret::expose), Some("refresh-new"));
	assert_eq!(grant.expires_in, Duration::days(90));
}

#[tokio::test]
async fn invalid_grant_is_rejected_without_retrying() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(400)
				.header("content-type", "application/json")
				.body("{\"error\":\"invalid_grant\",\"error_description\":\"refresh token expired\"}");
		})
		.await;
	let err = endpoint(&server, 3)
		.exchange("stale-token")
		.await
		.expect_err("Exchange should be rejected.");

	mock.assert_calls_async(1).await;

	assert!(matches!(
		&err,
		Error::Rejected { reason, status: Some(400) }
			if reason == "invalid_grant (refresh token expired)"
	));
}

#[tokio::test]
async fn unavailable_endpoint_is_retried_then_reported() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(503)
				.header("content-type", "application/json")
				.header("retry-after", "0")
				.body("{\"error\":\"temporarily_unavailable\"}");
		})
		.await;
	let err = endpoint(&server, 2)
		.exchange("seed-token")
		.await
		.expect_err("Exchange should fail after exhausting retries.");

	mock.assert_calls_async(3).await;

	assert!(matches!(
		err,
		Error::Transient(TransientError::TokenEndpoint { status: Some(503), .. })
	));
}

#[tokio::test]
async fn missing_expires_in_is_an_error() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"access_token\":\"access-new\",\"token_type\":\"bearer\"}");
		})
		.await;
	let err = endpoint(&server, 0)
		.exchange("seed-token")
		.await
		.expect_err("Exchange without expires_in should fail.");

	mock.assert_async().await;

	assert!(matches!(err, Error::Config(ConfigError::MissingExpiresIn)));
}

#[tokio::test]
async fn malformed_json_is_transient() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200).header("content-type", "application/json").body("{\"access_token\":");
		})
		.await;
	let err = endpoint(&server, 0)
		.exchange("seed-token")
		.await
		.expect_err("Malformed JSON should fail.");

	mock.assert_async().await;

	assert!(matches!(
		err,
		Error::Transient(TransientError::TokenResponseParse { status: Some(200), .. })
	));
}

#[tokio::test]
async fn unreachable_endpoint_is_a_transport_error() {
	let url = Url::parse("http://127.0.0.1:9/token").expect("URL should parse.");
	let http_client = ReqwestHttpClient::new(StdDuration::from_secs(2))
		.expect("HTTP client should build.")
		.with_retry_policy(RetryPolicy::none());
	let err = OAuthTokenEndpoint::new(&url, "client-id", &TokenSecret::new("secret"), http_client)
		.expect("Token endpoint should build.")
		.exchange("seed-token")
		.await
		.expect_err("Connection should be refused.");

	assert!(matches!(err, Error::Transport(_)));
}
