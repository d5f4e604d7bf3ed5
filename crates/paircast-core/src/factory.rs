// ── Connection factory ──
//
// Builds hub connections and enforces the at-most-one-live-connection
// rule. The supervisor asks for a connection per attempt; an existing
// live one is handed back, a disposed one is replaced.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use paircast_api::transport::join_path;
use paircast_api::{AccessTokenFn, HubConfig, HubConnection, TokenProvider, select_transports};

use crate::config::SyncConfig;
use crate::error::CoreError;
use crate::host::SyncHost;

pub struct ConnectionFactory {
    config: SyncConfig,
    host: Arc<dyn SyncHost>,
    tokens: Arc<TokenProvider>,
    current: Mutex<Option<HubConnection>>,
    /// Root token for hub lifetimes. Each built connection runs under a
    /// child, so a factory shutdown cancels every hub it ever produced.
    cancel: CancellationToken,
}

impl ConnectionFactory {
    pub fn new(
        config: SyncConfig,
        host: Arc<dyn SyncHost>,
        tokens: Arc<TokenProvider>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            host,
            tokens,
            current: Mutex::new(None),
            cancel,
        }
    }

    /// Return the live connection, building a fresh one if none exists
    /// or the previous one was disposed.
    pub async fn get_or_create(&self) -> Result<HubConnection, CoreError> {
        let mut current = self.current.lock().await;
        if let Some(hub) = current.as_ref() {
            if !hub.is_disposed() {
                return Ok(hub.clone());
            }
        }
        let hub = self.build()?;
        *current = Some(hub.clone());
        Ok(hub)
    }

    /// The live connection, if any.
    pub async fn current(&self) -> Option<HubConnection> {
        self.current
            .lock()
            .await
            .as_ref()
            .filter(|hub| !hub.is_disposed())
            .cloned()
    }

    /// Tear down the live connection. Safe to call with none.
    ///
    /// Dispose is silent: supervisors stop their own session tasks
    /// before calling this, so no handler fires mid-teardown.
    pub async fn dispose_hub(&self) {
        let hub = self.current.lock().await.take();
        if let Some(hub) = hub {
            debug!("disposing hub connection");
            hub.dispose().await;
        }
    }

    /// Construct a connection for the host's current server.
    ///
    /// Server URL, credentials, and transport preference are re-read
    /// from the host on every build so a server switch takes effect on
    /// the next connect.
    fn build(&self) -> Result<HubConnection, CoreError> {
        let server = self.host.server_url();
        let hub_url = join_path(&server, "sync")?;
        let transports = select_transports(
            self.host.transport_preference(),
            self.config.compatibility_mode,
            self.config.force_preferred_transport,
        );

        let hub_cancel = self.cancel.child_token();
        let tokens = self.tokens.clone();
        let token_cancel = hub_cancel.clone();
        let access_token: AccessTokenFn = Arc::new(move || {
            let tokens = tokens.clone();
            let cancel = token_cancel.clone();
            Box::pin(async move { tokens.get_or_update_token(&cancel).await })
        });

        let mut config = HubConfig::new(hub_url, access_token);
        config.transports = transports;
        config.api_key = self.host.api_key().or_else(|| self.host.secret_key());

        debug!(url = %config.url, transports = %transports, "building hub connection");
        Ok(HubConnection::new(
            self.tokens.http_client(),
            config,
            hub_cancel,
        ))
    }
}
