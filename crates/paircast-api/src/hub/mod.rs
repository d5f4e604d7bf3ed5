//! Real-time hub connectivity: negotiation, transports, framing, and
//! the self-healing connection.

mod connection;
mod negotiate;
mod retry;
mod transports;
mod wire;

pub use connection::{AccessTokenFn, HubConfig, HubConnection, PushMessage};
pub use retry::{ForeverRetry, NoRetry, RetryPolicy};
pub use transports::{TransportKind, TransportPreference, TransportSet, select_transports};
pub use wire::{
    API_VERSION, ClientVersion, Frame, SessionInfo, WIRE_VERSION, decode_frame, encode_frame,
};
