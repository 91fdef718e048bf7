//! Unattended OAuth 2.0 credential keeper. Wakes on a schedule, renews an expiring access token
//! through the `refresh_token` grant and keeps an append-only ledger of every attempt.
//!
//! The crate is organised around two pieces of real state-transition logic:
//!
//! - [`workflow::RefreshWorkflow`] runs one renewal attempt end to end and reports a
//!   [`workflow::RefreshOutcome`].
//! - [`scheduler::Scheduler`] wakes on a fixed interval or a daily wall-clock time and invokes the
//!   workflow inside a fault boundary until cancelled.
//!
//! Everything else ([`store`], [`ledger`], [`oauth`], [`notify`]) is a narrow trait with file,
//! in-memory, HTTP, and SMTP adapters.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod ledger;
pub mod notify;
pub mod oauth;
pub mod obs;
pub mod scheduler;
pub mod store;
pub mod workflow;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for tests; enabled via `cfg(test)` or the `test` crate
	//! feature.

	pub use crate::_prelude::*;

	// crates.io
	use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

	/// Builds an unsigned JWT-shaped token whose payload carries the provided claims.
	pub fn unsigned_token(claims: serde_json::Value) -> String {
		let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
		let payload = URL_SAFE_NO_PAD.encode(claims.to_string());

		format!("{header}.{payload}.signature")
	}

	/// Builds an unsigned JWT-shaped token that expires at `expires_at`.
	pub fn token_expiring_at(expires_at: OffsetDateTime) -> String {
		unsigned_token(serde_json::json!({ "sub": "keeper-test", "exp": expires_at.unix_timestamp() }))
	}

	/// Builds an unsigned JWT-shaped token that expires `delta` from now.
	pub fn token_expiring_in(delta: Duration) -> String {
		token_expiring_at(OffsetDateTime::now_utc() + delta)
	}
}

mod _prelude {
	pub use std::{
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		path::{Path, PathBuf},
		pin::Pin,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use tokio_util::sync::CancellationToken;
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use tokio_util;
pub use url;
#[cfg(feature = "cli")] use {clap as _, color_eyre as _, tracing_subscriber as _};
#[cfg(test)] use httpmock as _;
