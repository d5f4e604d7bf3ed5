// paircast-core: Connection lifecycle and session orchestration over paircast-api.

pub mod config;
pub mod error;
pub mod factory;
pub mod host;
pub mod supervisor;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{SyncConfig, TlsVerification};
pub use error::CoreError;
pub use factory::ConnectionFactory;
pub use host::{HostError, SyncHost};
pub use supervisor::{ConnectionState, SyncSupervisor};

// Re-export the wire-crate types hosts touch, so embedding a client
// needs only this crate.
pub use paircast_api::{
    ClientVersion, HubConnection, Notification, PushMessage, RestClient, SessionInfo, Severity,
    TokenProvider, TransportPreference,
};
