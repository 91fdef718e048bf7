//! Pure credential validity checks.
//!
//! Access tokens are treated as JWTs: the payload segment is base64url-decoded and its numeric
//! `exp` claim (Unix seconds) is read. Signatures are never verified. A token that cannot be
//! decoded has no known expiration and is reported as *not due*; callers that want the opposite
//! policy must handle the `None` case themselves.

// crates.io
use base64::{
	Engine,
	alphabet,
	engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
// self
use crate::_prelude::*;

const JWT_SEGMENTS: usize = 3;
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
	&alphabet::URL_SAFE,
	GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Deserialize)]
struct ExpiryClaims {
	exp: Option<f64>,
}

/// Extracts the expiration instant from a JWT-shaped access token.
///
/// Returns `None` for anything that is not a three-segment token with a decodable JSON payload
/// carrying a numeric `exp` claim.
pub fn expiration_of(access_token: &str) -> Option<OffsetDateTime> {
	let segments = access_token.trim().split('.').collect::<Vec<_>>();

	if segments.len() != JWT_SEGMENTS || segments[1].is_empty() {
		return None;
	}

	let payload = URL_SAFE_LENIENT.decode(segments[1]).ok()?;
	let claims = serde_json::from_slice::<ExpiryClaims>(&payload).ok()?;
	let exp = claims.exp.filter(|exp| exp.is_finite())?;

	OffsetDateTime::from_unix_timestamp(exp.floor() as i64).ok()
}

/// Decides whether the token is due for renewal.
///
/// Due means `expiration <= now + lead_days`; the boundary itself counts as due. A renewal
/// window reaching past the last representable instant covers every expiration. Undecodable
/// tokens are never due.
pub fn should_refresh(access_token: &str, lead_days: u32, now: OffsetDateTime) -> bool {
	match expiration_of(access_token) {
		Some(expires_at) => now
			.checked_add(Duration::days(i64::from(lead_days)))
			.is_none_or(|limit| expires_at <= limit),
		None => false,
	}
}
