// HTTP client construction and URL plumbing.
//
// The auth endpoint, hub negotiation, and the REST layer share TLS and
// timeout settings through this module, avoiding duplicated builder logic.
// URL scheme helpers live here too since every caller needs to flip
// between ws(s) and http(s) forms of the same server address.

use std::time::Duration;

use url::Url;

use crate::error::Error;

pub(crate) const USER_AGENT: &str = concat!("paircast/", env!("CARGO_PKG_VERSION"));

/// TLS verification mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// Use the system certificate store.
    #[default]
    System,
    /// Accept any certificate (for self-hosted servers with self-signed
    /// certificates).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        self.builder().build().map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }

    fn builder(&self) -> reqwest::ClientBuilder {
        let builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT);

        match self.tls {
            TlsMode::System => builder,
            TlsMode::DangerAcceptInvalid => builder.danger_accept_invalid_certs(true),
        }
    }
}

// ── URL helpers ──────────────────────────────────────────────────────

/// Rewrite a server URL to its HTTP(S) form.
///
/// Server addresses are commonly configured with a `wss://` scheme since
/// the hub is the primary endpoint; auth and negotiation are plain HTTPS
/// on the same host.
pub fn http_base(url: &Url) -> Result<Url, Error> {
    let replaced = match url.scheme() {
        "ws" => url.as_str().replacen("ws", "http", 1),
        "wss" => url.as_str().replacen("wss", "https", 1),
        _ => return Ok(url.clone()),
    };
    Ok(Url::parse(&replaced)?)
}

/// Rewrite a server URL to its WebSocket form.
pub fn ws_base(url: &Url) -> Result<Url, Error> {
    let replaced = match url.scheme() {
        "http" => url.as_str().replacen("http", "ws", 1),
        "https" => url.as_str().replacen("https", "wss", 1),
        _ => return Ok(url.clone()),
    };
    Ok(Url::parse(&replaced)?)
}

/// Append a path segment to a base URL, normalizing slashes.
///
/// `Url::join` treats the last segment of a base without a trailing slash
/// as a file and replaces it, which is never what we want here.
pub fn join_path(base: &Url, segment: &str) -> Result<Url, Error> {
    let full = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        segment.trim_start_matches('/')
    );
    Ok(Url::parse(&full)?)
}

/// Strip control characters from a header value.
///
/// Secrets come from user configuration and may contain stray newlines
/// from copy-paste; anything below 0x20 would otherwise allow header
/// injection on the wire.
pub fn sanitize_header_value(value: &str) -> String {
    value.chars().filter(|c| !c.is_control()).collect()
}

// ── Tests ────────────────────────────────────────────────────────────
