//! JWT acquisition and lifecycle.

pub mod claims;
mod provider;

pub use claims::{RENEWAL_MARGIN_SECS, SKEW_TOLERANCE_SECS, TokenClaims, decode_claims};
pub use provider::TokenProvider;
