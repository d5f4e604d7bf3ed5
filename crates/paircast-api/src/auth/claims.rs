// Token claim inspection.
//
// The client never verifies signatures -- that is the server's job. We
// only parse the time claims to decide when to renew and to catch a
// badly wrong local clock before it produces confusing auth failures.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Renew a token once its remaining validity drops below this margin.
pub const RENEWAL_MARGIN_SECS: i64 = 5 * 60;

/// Accept tokens whose validity bounds are at most this far from local
/// time. Anything beyond means the local clock is wrong.
pub const SKEW_TOLERANCE_SECS: i64 = 10 * 60;

/// Time claims extracted from a sync-server JWT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
    /// Not-before, seconds since the Unix epoch. Absent means no bound.
    #[serde(default)]
    pub nbf: i64,
}

impl TokenClaims {
    /// Expiry as a UTC timestamp, for logging.
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Whether the token is within the renewal margin of expiring
    /// (or already expired).
    pub fn needs_renewal(&self, now: DateTime<Utc>) -> bool {
        self.exp - now.timestamp() < RENEWAL_MARGIN_SECS
    }

    /// Reject tokens whose validity window is impossibly far from local
    /// time: expired more than the tolerance ago, or not valid until
    /// more than the tolerance from now. Small drift in either
    /// direction is accepted.
    pub fn check_clock_sanity(&self, now: DateTime<Utc>) -> Result<(), Error> {
        let now_ts = now.timestamp();

        let expired_for = now_ts - self.exp;
        if expired_for > SKEW_TOLERANCE_SECS {
            return Err(Error::ClockSkew {
                message: format!("token expired {expired_for}s ago"),
            });
        }

        let valid_in = self.nbf - now_ts;
        if valid_in > SKEW_TOLERANCE_SECS {
            return Err(Error::ClockSkew {
                message: format!("token not valid for another {valid_in}s"),
            });
        }

        Ok(())
    }
}

/// Parse the time claims out of a JWT without verifying its signature.
pub fn decode_claims(token: &str) -> Result<TokenClaims, Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.required_spec_claims = std::collections::HashSet::new();

    let data = decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| Error::InvalidToken {
            message: e.to_string(),
        })?;

    Ok(data.claims)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn mint(exp_offset_secs: i64, nbf_offset_secs: i64) -> String {
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            exp: now + exp_offset_secs,
            nbf: now + nbf_offset_secs,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test"))
            .expect("test token")
    }

    #[test]
    fn decodes_claims_without_verification() {
        let token = mint(3600, 0);
        let claims = decode_claims(&token).unwrap();
        let now = Utc::now().timestamp();
        assert!((claims.exp - now - 3600).abs() <= 2);
    }

    #[test]
    fn rejects_garbage_token() {
        assert!(matches!(
            decode_claims("not-a-jwt"),
            Err(Error::InvalidToken { .. })
        ));
    }

    #[test]
    fn renewal_boundary() {
        let now = Utc::now();

        // 4 minutes remaining: inside the 5-minute margin.
        let claims = TokenClaims { exp: now.timestamp() + 4 * 60, nbf: 0 };
        assert!(claims.needs_renewal(now));

        // 6 minutes remaining: outside the margin.
        let claims = TokenClaims { exp: now.timestamp() + 6 * 60, nbf: 0 };
        assert!(!claims.needs_renewal(now));
    }

    #[test]
    fn clock_sanity_rejects_long_expired() {
        let now = Utc::now();

        // Expired 11 minutes ago: beyond tolerance.
        let claims = TokenClaims { exp: now.timestamp() - 11 * 60, nbf: 0 };
        assert!(matches!(
            claims.check_clock_sanity(now),
            Err(Error::ClockSkew { .. })
        ));

        // Expired 9 minutes ago: inside tolerance, accepted.
        let claims = TokenClaims { exp: now.timestamp() - 9 * 60, nbf: 0 };
        assert!(claims.check_clock_sanity(now).is_ok());
    }

    #[test]
    fn clock_sanity_rejects_far_future_nbf() {
        let now = Utc::now();

        let claims = TokenClaims {
            exp: now.timestamp() + 3600,
            nbf: now.timestamp() + 11 * 60,
        };
        assert!(matches!(
            claims.check_clock_sanity(now),
            Err(Error::ClockSkew { .. })
        ));

        let claims = TokenClaims {
            exp: now.timestamp() + 3600,
            nbf: now.timestamp() + 9 * 60,
        };
        assert!(claims.check_clock_sanity(now).is_ok());
    }

    #[test]
    fn missing_nbf_defaults_to_no_bound() {
        let now = Utc::now().timestamp();
        let token = {
            #[derive(Serialize)]
            struct ExpOnly {
                exp: i64,
            }
            encode(
                &Header::default(),
                &ExpOnly { exp: now + 3600 },
                &EncodingKey::from_secret(b"test"),
            )
            .unwrap()
        };

        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.nbf, 0);
        assert!(claims.check_clock_sanity(Utc::now()).is_ok());
    }
}
