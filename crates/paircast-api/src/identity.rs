// Authentication identity: which player, on which server, with which
// credential. Tokens are cached per identity, so equality and hashing
// must be structural across all fields including the secret.

use std::fmt;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

/// One authentication identity: a player on a specific server.
///
/// Used as the token-cache key. Two attempts with the same identity are
/// served the same cached token until it is invalidated.
#[derive(Debug, Clone)]
pub struct IdentityKey {
    /// Base URL of the sync server.
    pub server_url: Url,
    /// Hashed identifier of the player character.
    pub player_hash: String,
    /// Secondary identity qualifier. Empty unless the account scheme
    /// distinguishes multiple identities behind one credential.
    pub alt_id: String,
    /// The secret key or API key used to mint tokens.
    pub secret: SecretString,
}

impl PartialEq for IdentityKey {
    fn eq(&self, other: &Self) -> bool {
        self.server_url == other.server_url
            && self.player_hash == other.player_hash
            && self.alt_id == other.alt_id
            && self.secret.expose_secret() == other.secret.expose_secret()
    }
}

impl Eq for IdentityKey {}

impl Hash for IdentityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.server_url.hash(state);
        self.player_hash.hash(state);
        self.alt_id.hash(state);
        self.secret.expose_secret().hash(state);
    }
}

impl fmt::Display for IdentityKey {
    /// Loggable form: server and player hash, never the secret.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.server_url, self.player_hash)
    }
}

// ── Identity resolution seam ─────────────────────────────────────────

/// Where the current identity comes from.
///
/// Implemented by the host application over its live game state and
/// server configuration. The token provider reads this on every call;
/// none of the answers are cached here.
#[async_trait]
pub trait IdentitySource: Send + Sync {
    /// Hashed identifier of the local player, if one is logged in.
    async fn player_hash(&self) -> Option<String>;

    /// Base URL of the sync server to authenticate against.
    fn server_url(&self) -> Url;

    /// Per-server secret key, if configured.
    fn secret_key(&self) -> Option<SecretString>;

    /// Account-wide API key. Takes precedence over [`secret_key`](Self::secret_key).
    fn api_key(&self) -> Option<SecretString>;

    /// Secondary identity qualifier. Empty by default.
    fn alt_id(&self) -> String {
        String::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
