//! The active access credential as owned by the credential store.

// self
use crate::{
	_prelude::*,
	auth::{secret::TokenSecret, validity},
};

/// Snapshot of the currently stored access credential.
///
/// Values are never mutated; a refresh produces a brand-new credential that replaces the stored
/// one. The expiration is recomputed from the token on every call instead of being cached.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
	/// Bearer token presented to the third-party API.
	pub access_token: TokenSecret,
}
impl Credential {
	/// Wraps an access token value.
	pub fn new(access_token: impl Into<TokenSecret>) -> Self {
		Self { access_token: access_token.into() }
	}

	/// Expiration instant embedded in the access token, when it can be decoded.
	pub fn expires_at(&self) -> Option<OffsetDateTime> {
		validity::expiration_of(self.access_token.expose())
	}

	/// Returns `true` when renewal is due within `lead_days` of `now`.
	pub fn should_refresh(&self, lead_days: u32, now: OffsetDateTime) -> bool {
		validity::should_refresh(self.access_token.expose(), lead_days, now)
	}
}
impl Debug for Credential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Credential")
			.field("access_token", &"<redacted>")
			.field("expires_at", &self.expires_at())
			.finish()
	}
}
