// paircast-api: Async client for the paircast character-sync server (auth, hub, REST).

pub mod auth;
pub mod error;
pub mod events;
pub mod hub;
pub mod identity;
pub mod rest;
pub mod transport;

pub use error::Error;

// ── Primary re-exports ──────────────────────────────────────────────
pub use auth::TokenProvider;
pub use events::{ApiEvent, HubEvent, Notification, Severity};
pub use hub::{
    AccessTokenFn, ClientVersion, ForeverRetry, HubConfig, HubConnection, NoRetry, PushMessage,
    RetryPolicy, SessionInfo, TransportKind, TransportPreference, TransportSet, select_transports,
};
pub use identity::{IdentityKey, IdentitySource};
pub use rest::RestClient;
pub use transport::{TlsMode, TransportConfig};
