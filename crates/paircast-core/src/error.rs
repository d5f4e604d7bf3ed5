// ── Error types ──
//
// User-facing errors from paircast-core. These are NOT wire-specific --
// consumers never see HTTP status codes or frame decode failures
// directly. The `From<paircast_api::Error>` impl translates api-layer
// errors into domain-appropriate variants.

use thiserror::Error;

use paircast_api::Error as ApiError;

use crate::host::HostError;

/// Everything that can go wrong while supervising a sync session.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach the server: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Local clock disagrees with the server: {message}")]
    ClockSkew { message: String },

    #[error("Server protocol version {server} is incompatible with client protocol {local}")]
    VersionMismatch { server: u16, local: u16 },

    #[error("Rate limited by the server")]
    RateLimited,

    #[error("Not connected to a server")]
    NotConnected,

    // ── Collaborator errors ──────────────────────────────────────────
    #[error("Host call failed: {message}")]
    Host { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Control flow ─────────────────────────────────────────────────
    #[error("Operation cancelled")]
    Cancelled,

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Returns `true` if the attempt should end in the `Unauthorized`
    /// state rather than be retried.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailed { .. })
    }
}

// ── Conversion from api-layer errors ─────────────────────────────────

impl From<ApiError> for CoreError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::AuthFailure { reason } => CoreError::AuthenticationFailed {
                message: reason,
            },
            ApiError::NoSecretConfigured => CoreError::AuthenticationFailed {
                message: "no secret key or API key is configured for the current character"
                    .into(),
            },
            ApiError::NoTokenCached => CoreError::AuthenticationFailed {
                message: "no token has been acquired yet".into(),
            },
            ApiError::InvalidToken { message } => CoreError::AuthenticationFailed {
                message: format!("server issued an unreadable token: {message}"),
            },
            ApiError::ClockSkew { message } => CoreError::ClockSkew { message },
            ApiError::RateLimited => CoreError::RateLimited,
            ApiError::Transport(ref e) => {
                if e.status().map(|s| s.as_u16()) == Some(401) {
                    CoreError::AuthenticationFailed {
                        message: e.to_string(),
                    }
                } else if e.status().map(|s| s.as_u16()) == Some(429) {
                    CoreError::RateLimited
                } else {
                    CoreError::ConnectionFailed {
                        reason: e.to_string(),
                    }
                }
            }
            ApiError::InvalidUrl(e) => CoreError::Config {
                message: format!("invalid URL: {e}"),
            },
            ApiError::Tls(message) => CoreError::ConnectionFailed {
                reason: format!("TLS error: {message}"),
            },
            ApiError::Negotiate { message } => CoreError::ConnectionFailed {
                reason: format!("negotiation failed: {message}"),
            },
            ApiError::NoUsableTransport => CoreError::ConnectionFailed {
                reason: "no transport is usable between client and server".into(),
            },
            ApiError::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                reason: format!("websocket connection failed: {reason}"),
            },
            ApiError::Handshake { message } => CoreError::ConnectionFailed {
                reason: format!("handshake failed: {message}"),
            },
            ApiError::HubClosed { reason } => CoreError::ConnectionFailed {
                reason: format!("connection closed: {reason}"),
            },
            ApiError::NotConnected => CoreError::NotConnected,
            ApiError::Invocation { target, message } => CoreError::ConnectionFailed {
                reason: format!("server call {target} failed: {message}"),
            },
            ApiError::FrameEncode(e) => CoreError::Internal(format!("frame encode: {e}")),
            ApiError::FrameDecode(e) => CoreError::Internal(format!("frame decode: {e}")),
            ApiError::MalformedFrame(detail) => {
                CoreError::Internal(format!("malformed frame: {detail}"))
            }
            ApiError::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("deserialization error: {message}"))
            }
            ApiError::Cancelled => CoreError::Cancelled,
        }
    }
}

impl From<HostError> for CoreError {
    fn from(err: HostError) -> Self {
        CoreError::Host {
            message: err.to_string(),
        }
    }
}
