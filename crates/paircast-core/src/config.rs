// ── Runtime sync configuration ──
//
// Process-wide tuning for the sync session. Per-server values (URL,
// credentials, transport preference) come from the host collaborator
// instead, so switching servers never requires rebuilding this config.
// The embedding plugin constructs a `SyncConfig` and hands it in.

use std::time::Duration;

use paircast_api::ClientVersion;
use paircast_api::transport::{TlsMode, TransportConfig};

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict). Default: public sync servers carry
    /// real certificates.
    #[default]
    SystemDefaults,
    /// Skip verification (self-hosted servers with self-signed certs).
    DangerAcceptInvalid,
}

/// Configuration for the sync session.
///
/// Built by the embedding plugin, passed to `SyncSupervisor` -- core
/// never reads config files.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Version of the local client, checked against the server's
    /// minimum during the handshake.
    pub client_version: ClientVersion,
    /// Host environment where the streaming transport is known to be
    /// unreliable; collapses transport selection to long polling.
    pub compatibility_mode: bool,
    /// Keep the preferred transport even in compatibility mode.
    pub force_preferred_transport: bool,
    /// Connect automatically when a character logs in.
    pub auto_connect: bool,
    /// TLS verification strategy.
    pub tls: TlsVerification,
    /// Request timeout for auth, negotiation, and REST calls.
    pub timeout: Duration,
    /// Interval of the in-session heartbeat and token check.
    pub health_interval: Duration,
}

impl SyncConfig {
    pub fn new(client_version: ClientVersion) -> Self {
        Self {
            client_version,
            compatibility_mode: false,
            force_preferred_transport: false,
            auto_connect: true,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            health_interval: Duration::from_secs(30),
        }
    }

    /// Build the api-layer transport settings from this config.
    pub(crate) fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: match self.tls {
                TlsVerification::SystemDefaults => TlsMode::System,
                TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
            },
            timeout: self.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let config = SyncConfig::new(ClientVersion::new(1, 2, 3));
        assert!(config.auto_connect);
        assert!(!config.compatibility_mode);
        assert_eq!(config.tls, TlsVerification::SystemDefaults);
        assert_eq!(config.health_interval, Duration::from_secs(30));
    }

    #[test]
    fn transport_mapping_carries_timeout() {
        let mut config = SyncConfig::new(ClientVersion::new(1, 0, 0));
        config.timeout = Duration::from_secs(5);
        config.tls = TlsVerification::DangerAcceptInvalid;
        let transport = config.transport();
        assert_eq!(transport.timeout, Duration::from_secs(5));
        assert_eq!(transport.tls, TlsMode::DangerAcceptInvalid);
    }
}
