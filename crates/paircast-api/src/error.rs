use thiserror::Error;

/// Top-level error type for the `paircast-api` crate.
///
/// Covers every failure mode across all API surfaces:
/// authentication, transport, hub negotiation, wire framing, and REST.
/// `paircast-core` maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// A player identity exists but no secret key or API key is configured
    /// for the current server.
    #[error("No secret key configured for the current server")]
    NoSecretConfigured,

    /// An identity resolved but no token has been cached for it yet.
    #[error("No token cached for the current identity")]
    NoTokenCached,

    /// The auth endpoint rejected the credential (HTTP 401). The reason
    /// carries the raw response body.
    #[error("Authentication failed: {reason}")]
    AuthFailure { reason: String },

    /// The server returned a token that cannot be parsed as a JWT.
    #[error("Invalid token: {message}")]
    InvalidToken { message: String },

    /// Token validity claims are too far from local time in either
    /// direction. Almost always a wrong system clock.
    #[error("Token validity is outside clock tolerance: {message}")]
    ClockSkew { message: String },

    /// The auth endpoint is throttling requests (HTTP 429).
    #[error("Rate limited by the authentication endpoint")]
    RateLimited,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Hub ─────────────────────────────────────────────────────────
    /// Transport negotiation with the hub endpoint failed.
    #[error("Negotiation failed: {message}")]
    Negotiate { message: String },

    /// The server advertised no transport we are allowed to use.
    #[error("No usable transport (server offers none of the allowed kinds)")]
    NoUsableTransport,

    /// WebSocket connection failed or dropped mid-session.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// The wire-level handshake was rejected or timed out.
    #[error("Hub handshake failed: {message}")]
    Handshake { message: String },

    /// The hub closed the connection and does not want us back.
    #[error("Hub closed the connection: {reason}")]
    HubClosed { reason: String },

    /// An operation was attempted on a connection that is not running.
    #[error("Hub connection is not established")]
    NotConnected,

    /// A hub invocation completed with an error or never completed.
    #[error("Invocation of {target} failed: {message}")]
    Invocation { target: String, message: String },

    // ── Wire ────────────────────────────────────────────────────────
    /// Frame serialization failed.
    #[error("Frame encode failed: {0}")]
    FrameEncode(#[from] rmp_serde::encode::Error),

    /// Frame deserialization failed.
    #[error("Frame decode failed: {0}")]
    FrameDecode(#[from] rmp_serde::decode::Error),

    /// The frame envelope itself is broken (empty, bad compression
    /// marker, corrupt compressed block).
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Cancellation ────────────────────────────────────────────────
    /// The operation was cancelled. Callers treat this as a silent abort.
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Returns `true` if the server explicitly rejected our credential.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthFailure { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Negotiate { .. } | Self::WebSocketConnect(_) | Self::Handshake { .. } => true,
            _ => false,
        }
    }

    /// Extract the HTTP status code, if this error carries one.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            Self::AuthFailure { .. } => Some(401),
            Self::RateLimited => Some(429),
            _ => None,
        }
    }
}
