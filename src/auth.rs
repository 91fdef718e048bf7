//! Credential model, secret wrapper, and the pure validity check that decides when to renew.

pub mod credential;
pub mod secret;
pub mod validity;

pub use credential::*;
pub use secret::*;
pub use validity::*;
