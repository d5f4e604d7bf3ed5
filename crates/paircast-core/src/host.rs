// ── Host collaborator seam ──
//
// Everything the core must ask the embedding plugin for: player
// presence, identity, per-server settings, and the initial data loads
// that follow a successful handshake. Implementations live in the
// plugin; core only holds an `Arc<dyn SyncHost>`.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use paircast_api::{IdentitySource, TransportPreference};

/// Failure reported by a host collaborator call.
///
/// Deliberately opaque: the core treats every host failure as a
/// retryable condition and never inspects it beyond the message.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HostError(String);

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Services the embedding plugin provides to the sync core.
#[async_trait]
pub trait SyncHost: Send + Sync {
    /// Whether the player character is currently loaded in the world.
    async fn is_player_present(&self) -> bool;

    /// Stable hash of the current player identity, when present.
    async fn player_name_hash(&self) -> Option<String>;

    /// Base URL of the currently selected sync server.
    fn server_url(&self) -> Url;

    /// Per-server secret key, if one is configured.
    fn secret_key(&self) -> Option<SecretString>;

    /// Globally configured API key. Takes precedence over the
    /// per-server secret.
    fn api_key(&self) -> Option<SecretString>;

    /// Transport preference for the currently selected server.
    fn transport_preference(&self) -> TransportPreference {
        TransportPreference::Auto
    }

    /// Secondary identity discriminator. Empty for the common case.
    fn alt_id(&self) -> String {
        String::new()
    }

    /// Load the paired-entity list after a session is established.
    async fn load_pairs(&self) -> Result<(), HostError>;

    /// Load online-presence state after a session is established.
    async fn load_online(&self) -> Result<(), HostError>;
}

/// Adapts a [`SyncHost`] to the api crate's [`IdentitySource`] seam so
/// the token provider can resolve identities through the host.
pub(crate) struct HostIdentitySource {
    host: Arc<dyn SyncHost>,
}

impl HostIdentitySource {
    pub(crate) fn new(host: Arc<dyn SyncHost>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl IdentitySource for HostIdentitySource {
    async fn player_hash(&self) -> Option<String> {
        self.host.player_name_hash().await
    }

    fn server_url(&self) -> Url {
        self.host.server_url()
    }

    fn secret_key(&self) -> Option<SecretString> {
        self.host.secret_key()
    }

    fn api_key(&self) -> Option<SecretString> {
        self.host.api_key()
    }

    fn alt_id(&self) -> String {
        self.host.alt_id()
    }
}
