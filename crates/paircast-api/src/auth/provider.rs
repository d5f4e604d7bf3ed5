//! Token issuance, renewal, and caching.
//!
//! One [`TokenProvider`] serves every consumer that needs a bearer token:
//! the hub connection's credential callback, the REST layer, and the
//! supervisor's health checks. Tokens are cached per [`IdentityKey`] and
//! expiry is checked lazily on each access -- there is no background
//! renewal timer.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::Utc;
use dashmap::DashMap;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::auth::claims::decode_claims;
use crate::error::Error;
use crate::events::{ApiEvent, Notification};
use crate::identity::{IdentityKey, IdentitySource};
use crate::transport::{http_base, join_path, sanitize_header_value};

const EVENT_CHANNEL_CAPACITY: usize = 64;

// ── Wire shapes ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    #[serde(rename = "apiKey")]
    api_key: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthReply {
    token: String,
    #[serde(default)]
    expires_utc: Option<chrono::DateTime<Utc>>,
}

// ── TokenProvider ────────────────────────────────────────────────────

/// Orchestrates token acquisition against the server's auth endpoint.
///
/// Thread-safe and shared behind an [`Arc`]; all consumers of a single
/// server connection use the same provider so the cache is coherent.
pub struct TokenProvider {
    http: reqwest::Client,
    source: Arc<dyn IdentitySource>,
    cache: DashMap<IdentityKey, String>,
    /// Fallback identity used while the player entity is briefly absent
    /// (zone transitions, cutscenes). Last write wins; staleness costs
    /// at most one extra reconnect attempt.
    last_identity: ArcSwapOption<IdentityKey>,
    events_tx: broadcast::Sender<ApiEvent>,
}

impl TokenProvider {
    pub fn new(http: reqwest::Client, source: Arc<dyn IdentitySource>) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            http,
            source,
            cache: DashMap::new(),
            last_identity: ArcSwapOption::empty(),
            events_tx,
        }
    }

    /// Subscribe to auth-layer events (notices and credential revocation).
    pub fn events(&self) -> broadcast::Receiver<ApiEvent> {
        self.events_tx.subscribe()
    }

    /// The HTTP client this provider was built with.
    ///
    /// Hub dialing shares it so every endpoint of one server sees the
    /// same pool, TLS, and timeout settings.
    pub fn http_client(&self) -> reqwest::Client {
        self.http.clone()
    }

    /// Return the cached token for the current identity without network
    /// I/O.
    ///
    /// `Ok(None)` if no identity resolves (nobody logged in and no prior
    /// identity known). Fails with [`Error::NoTokenCached`] if an
    /// identity exists but nothing is cached for it yet.
    pub async fn token(&self) -> Result<Option<String>, Error> {
        let Some(identity) = self.resolve_identity().await? else {
            return Ok(None);
        };
        match self.cache.get(&identity) {
            Some(entry) => Ok(Some(entry.value().clone())),
            None => Err(Error::NoTokenCached),
        }
    }

    /// Return the cached token if it is still comfortably valid,
    /// otherwise renew it.
    ///
    /// `Ok(None)` if no identity resolves; the caller proceeds without
    /// a credential and lets the server reject if it must.
    pub async fn get_or_update_token(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, Error> {
        let Some(identity) = self.resolve_identity().await? else {
            debug!("no identity available, skipping token acquisition");
            return Ok(None);
        };

        // Clone the token out so no cache guard is held across awaits.
        let cached = self.cache.get(&identity).map(|e| e.value().clone());
        let renewal = match cached {
            Some(token) => {
                let now = Utc::now();
                match decode_claims(&token) {
                    Ok(claims)
                        if !claims.needs_renewal(now)
                            && claims.check_clock_sanity(now).is_ok() =>
                    {
                        return Ok(Some(token));
                    }
                    Ok(claims) => {
                        debug!(
                            identity = %identity,
                            expires = %claims.expires_at(),
                            "cached token stale, renewing"
                        );
                        true
                    }
                    Err(e) => {
                        warn!(identity = %identity, error = %e, "cached token unparseable, renewing");
                        true
                    }
                }
            }
            None => false,
        };

        let token = self.request_token(&identity, renewal, cancel).await?;
        Ok(Some(token))
    }

    /// Renew unconditionally, bypassing the freshness check.
    ///
    /// Fails if no identity can be resolved.
    pub async fn force_renew(&self, cancel: &CancellationToken) -> Result<String, Error> {
        let Some(identity) = self.resolve_identity().await? else {
            return Err(Error::NoSecretConfigured);
        };
        let renewal = self.cache.contains_key(&identity);
        self.request_token(&identity, renewal, cancel).await
    }

    /// Whether the cached token for the current identity is inside the
    /// renewal margin (or missing entirely).
    pub async fn cached_token_needs_renewal(&self) -> bool {
        match self.token().await {
            Ok(Some(token)) => {
                decode_claims(&token).map_or(true, |c| c.needs_renewal(Utc::now()))
            }
            // No identity: nobody to renew for.
            Ok(None) => false,
            // Nothing cached (or no secret): let the renewal path decide.
            Err(_) => true,
        }
    }

    /// Host hook: a character logged in. Clears all cached state so the
    /// next call resolves fresh.
    pub fn on_login(&self) {
        debug!("login: clearing token cache");
        self.clear();
    }

    /// Host hook: the character logged out.
    pub fn on_logout(&self) {
        debug!("logout: clearing token cache");
        self.clear();
    }

    fn clear(&self) {
        self.cache.clear();
        self.last_identity.store(None);
    }

    // ── Identity resolution ──────────────────────────────────────────

    /// Resolve the current identity from the source, preferring the
    /// account-wide API key over the per-server secret.
    ///
    /// If the player entity is absent, falls back to the last
    /// successfully resolved identity rather than failing outright.
    async fn resolve_identity(&self) -> Result<Option<IdentityKey>, Error> {
        let Some(player_hash) = self.source.player_hash().await else {
            return Ok(self.last_identity.load_full().map(|id| (*id).clone()));
        };

        let Some(secret) = self.source.api_key().or_else(|| self.source.secret_key()) else {
            self.notify(Notification::error(
                "Cannot authenticate",
                "No secret key is configured for the current server.",
            ));
            return Err(Error::NoSecretConfigured);
        };

        let identity = IdentityKey {
            server_url: self.source.server_url(),
            player_hash,
            alt_id: self.source.alt_id(),
            secret,
        };
        self.last_identity.store(Some(Arc::new(identity.clone())));
        Ok(Some(identity))
    }

    // ── Token request ────────────────────────────────────────────────

    /// Perform the auth POST and maintain the cache: a fresh token is
    /// inserted, any failure other than cancellation evicts the
    /// identity's entry.
    async fn request_token(
        &self,
        identity: &IdentityKey,
        renewal: bool,
        cancel: &CancellationToken,
    ) -> Result<String, Error> {
        let result = self.request_token_inner(identity, renewal, cancel).await;

        match &result {
            Ok(token) => {
                self.cache.insert(identity.clone(), token.clone());
            }
            Err(Error::Cancelled) => {}
            Err(_) => {
                self.cache.remove(identity);
            }
        }

        result
    }

    async fn request_token_inner(
        &self,
        identity: &IdentityKey,
        renewal: bool,
        cancel: &CancellationToken,
    ) -> Result<String, Error> {
        let base = http_base(&identity.server_url)?;
        let url = join_path(&base, "auth")?;
        let secret = sanitize_header_value(identity.secret.expose_secret());

        debug!(identity = %identity, renewal, "requesting token");

        let request = self
            .http
            .post(url)
            .header("X-Api-Key", &secret)
            .json(&AuthRequest { api_key: &secret });

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            resp = request.send() => resp.map_err(Error::Transport)?,
        };

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            if renewal {
                self.notify(Notification::error(
                    "Authentication failed",
                    "Your session could not be renewed. Check the secret key for this \
                     server and reconnect.",
                ));
            } else {
                self.notify(Notification::error(
                    "Authentication failed",
                    "The server rejected your credentials. Check the secret key for \
                     this server.",
                ));
            }
            let _ = self.events_tx.send(ApiEvent::AuthRevoked);
            return Err(Error::AuthFailure { reason: body });
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited);
        }

        let response = response.error_for_status()?;
        let body = response.text().await?;
        let reply: AuthReply = serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: body.clone(),
        })?;

        let claims = decode_claims(&reply.token)?;
        if let Err(e) = claims.check_clock_sanity(Utc::now()) {
            self.notify(Notification::error(
                "Clock skew detected",
                "Your system clock differs from the server by more than ten minutes. \
                 Fix the clock and reconnect.",
            ));
            return Err(e);
        }

        debug!(
            identity = %identity,
            expires = %claims.expires_at(),
            reported_expiry = ?reply.expires_utc,
            renewal,
            "token acquired"
        );
        Ok(reply.token)
    }

    fn notify(&self, notification: Notification) {
        // A send error only means nobody is subscribed right now.
        let _ = self.events_tx.send(ApiEvent::Notice(notification));
    }
}

// ── Tests ────────────────────────────────────────────────────────────
