// ── Sync supervisor ─────────────────────────────────────────────────
//
// Owns the connection lifecycle for one sync server: waits for the
// player, drives connect attempts with jittered backoff, performs the
// application-level session handshake, and keeps the session healthy
// (heartbeats, credential freshness) until told to stop.
//
// All transitions are observable through a watch channel; user-facing
// messages go out as notifications. The supervisor never touches a UI.

use std::future::Future;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use rand::Rng;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use paircast_api::hub::API_VERSION;
use paircast_api::{
    ApiEvent, HubConnection, HubEvent, Notification, PushMessage, SessionInfo, TokenProvider,
};

use crate::config::SyncConfig;
use crate::error::CoreError;
use crate::factory::ConnectionFactory;
use crate::host::{HostIdentitySource, SyncHost};

const NOTIFICATION_CHANNEL_SIZE: usize = 64;
const PUSH_CHANNEL_SIZE: usize = 256;

/// How often to re-check for the player while waiting to connect.
const PLAYER_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Jitter window between ordinary reconnect attempts.
const RECONNECT_BACKOFF_SECS: RangeInclusive<u64> = 5..=20;

/// Longer window after the server told us to slow down.
const RATE_LIMIT_BACKOFF_SECS: RangeInclusive<u64> = 60..=120;

// ── Connection state ────────────────────────────────────────────────

/// Lifecycle state of the supervised connection.
///
/// The `Display` form is suitable for status lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ConnectionState {
    /// No session, and no attempt in progress.
    Offline,
    /// A teardown is in progress.
    Disconnecting,
    /// Torn down; a new attempt may follow.
    Disconnected,
    /// An attempt is in progress (including waiting for the player).
    Connecting,
    /// Session established and healthy.
    Connected,
    /// The transport dropped; reconnection is being driven.
    Reconnecting,
    /// The server rejected our credential. Requires user action.
    Unauthorized,
    /// Protocol versions are incompatible. Requires an update.
    #[strum(serialize = "Version mismatch")]
    VersionMismatch,
    /// The server asked us to back off. A delayed retry is scheduled.
    #[strum(serialize = "Rate limited")]
    RateLimited,
    /// A character logged in but auto-connect is disabled.
    #[strum(serialize = "Auto-connect disabled")]
    NoAutoLogin,
}

// ── Supervisor ──────────────────────────────────────────────────────

/// Cheaply cloneable handle to the connection supervisor.
///
/// Construct once per sync server, hand clones to whoever needs to
/// observe state or trigger reconnects, and call [`shutdown`] exactly
/// once when the host unloads.
///
/// [`shutdown`]: SyncSupervisor::shutdown
#[derive(Clone)]
pub struct SyncSupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    config: SyncConfig,
    host: Arc<dyn SyncHost>,
    tokens: Arc<TokenProvider>,
    factory: ConnectionFactory,
    state_tx: watch::Sender<ConnectionState>,
    notifications_tx: broadcast::Sender<Notification>,
    push_tx: broadcast::Sender<Arc<PushMessage>>,
    /// Root token; cancelled once, at shutdown.
    cancel: CancellationToken,
    /// Scope of the current connect attempt. Swapped on every restart.
    attempt_cancel: Mutex<CancellationToken>,
    /// Scope of the current established session's helper tasks.
    session_cancel: Mutex<CancellationToken>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    /// Token the live session was authenticated with. The health loop
    /// compares against it to detect rotation.
    last_token: ArcSwapOption<String>,
    api_events_started: AtomicBool,
}

impl SyncSupervisor {
    /// Build a supervisor for the host's current server.
    ///
    /// Nothing connects until [`connect`] or [`on_login`] is called.
    ///
    /// [`connect`]: SyncSupervisor::connect
    /// [`on_login`]: SyncSupervisor::on_login
    pub fn new(config: SyncConfig, host: Arc<dyn SyncHost>) -> Result<Self, CoreError> {
        let http = config.transport().build_client()?;
        let tokens = Arc::new(TokenProvider::new(
            http,
            Arc::new(HostIdentitySource::new(host.clone())),
        ));
        let cancel = CancellationToken::new();
        let factory = ConnectionFactory::new(
            config.clone(),
            host.clone(),
            tokens.clone(),
            cancel.child_token(),
        );
        let (state_tx, _) = watch::channel(ConnectionState::Offline);
        let (notifications_tx, _) = broadcast::channel(NOTIFICATION_CHANNEL_SIZE);
        let (push_tx, _) = broadcast::channel(PUSH_CHANNEL_SIZE);
        Ok(Self {
            inner: Arc::new(SupervisorInner {
                config,
                host,
                tokens,
                factory,
                state_tx,
                notifications_tx,
                push_tx,
                attempt_cancel: Mutex::new(cancel.child_token()),
                session_cancel: Mutex::new(cancel.child_token()),
                cancel,
                task_handles: Mutex::new(Vec::new()),
                last_token: ArcSwapOption::empty(),
                api_events_started: AtomicBool::new(false),
            }),
        })
    }

    /// Start connecting. Cancels any attempt already in flight.
    pub async fn connect(&self) {
        self.ensure_api_event_task().await;
        self.restart().await;
    }

    /// Abandon the current attempt or session and start a fresh cycle.
    //
    // Desugared from `async fn` with an explicit `Send` bound: tasks
    // spawned from here await `restart` again, and the compiler cannot
    // close that auto-trait cycle over the implicit opaque type.
    pub fn restart(&self) -> impl Future<Output = ()> + Send + '_ {
        async move {
            let cancel = {
                let mut guard = self.inner.attempt_cancel.lock().await;
                guard.cancel();
                let fresh = self.inner.cancel.child_token();
                *guard = fresh.clone();
                fresh
            };
            let mut handles = self.inner.task_handles.lock().await;
            handles.retain(|handle| !handle.is_finished());
            handles.push(tokio::spawn(connection_loop(self.clone(), cancel)));
        }
    }

    /// Stop connecting and tear the session down. The supervisor stays
    /// usable; call [`connect`] to go online again.
    ///
    /// [`connect`]: SyncSupervisor::connect
    pub async fn disconnect(&self) {
        self.inner.attempt_cancel.lock().await.cancel();
        self.teardown().await;
    }

    /// Tear everything down and stop all background tasks for good.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.teardown().await;
        // Await outside the lock; a dying task may itself be inside
        // `restart` waiting for it.
        let handles: Vec<_> = {
            let mut guard = self.inner.task_handles.lock().await;
            guard.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        debug!("supervisor shut down");
    }

    /// Host hook: a character logged in.
    ///
    /// Clears cached credentials for the previous identity and, when
    /// auto-connect is enabled, starts a connection cycle.
    pub async fn on_login(&self) {
        self.inner.tokens.on_login();
        if self.inner.config.auto_connect {
            self.connect().await;
        } else {
            self.set_state(ConnectionState::NoAutoLogin);
        }
    }

    /// Host hook: the character logged out. Tears the session down.
    pub async fn on_logout(&self) {
        self.inner.tokens.on_logout();
        self.inner.attempt_cancel.lock().await.cancel();
        self.teardown().await;
        self.set_state(ConnectionState::Offline);
    }

    /// Watch the connection state.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// The state right now.
    pub fn current_state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to user-facing notifications.
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.inner.notifications_tx.subscribe()
    }

    /// Subscribe to server pushes. The subscription survives
    /// reconnects; messages sent while offline are simply absent.
    pub fn pushes(&self) -> broadcast::Receiver<Arc<PushMessage>> {
        self.inner.push_tx.subscribe()
    }

    /// The live hub connection, if one exists.
    pub async fn current_hub(&self) -> Option<HubConnection> {
        self.inner.factory.current().await
    }

    /// The token provider backing this supervisor. REST clients share
    /// it so renewals benefit every caller.
    pub fn tokens(&self) -> Arc<TokenProvider> {
        self.inner.tokens.clone()
    }

    // ── Internals ───────────────────────────────────────────────────

    async fn ensure_api_event_task(&self) {
        if self.inner.api_events_started.swap(true, Ordering::SeqCst) {
            return;
        }
        // Subscribe before spawning so no early notice is missed.
        let events = self.inner.tokens.events();
        let task = api_event_task(self.clone(), events, self.inner.cancel.clone());
        self.inner.task_handles.lock().await.push(tokio::spawn(task));
    }

    fn set_state(&self, state: ConnectionState) {
        debug!(%state, "connection state");
        let _ = self.inner.state_tx.send(state);
    }

    fn notify(&self, notification: Notification) {
        let _ = self.inner.notifications_tx.send(notification);
    }

    /// Stop session helper tasks and dispose the live connection.
    async fn teardown(&self) {
        self.inner.session_cancel.lock().await.cancel();
        self.set_state(ConnectionState::Disconnecting);
        self.inner.factory.dispose_hub().await;
        self.set_state(ConnectionState::Disconnected);
    }

    /// One full connect attempt: hub transport, session handshake,
    /// helper task spawn. Any error leaves teardown to the caller.
    async fn connect_once(&self, cancel: &CancellationToken) -> Result<(), CoreError> {
        let hub = self.inner.factory.get_or_create().await?;
        // Subscribe before starting so no early event is missed.
        let events = hub.events();
        let pushes = hub.pushes();
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(CoreError::Cancelled),
            result = hub.start() => result?,
        }

        let info = self.establish_session(&hub).await?;
        self.notify(Notification::info(
            "Connected",
            format!("Connected to {}", info.server_name),
        ));
        if let Some(motd) = info.motd {
            self.notify(Notification::info(info.server_name, motd));
        }

        let session = {
            let mut guard = self.inner.session_cancel.lock().await;
            guard.cancel();
            let fresh = self.inner.cancel.child_token();
            *guard = fresh.clone();
            fresh
        };
        let mut handles = self.inner.task_handles.lock().await;
        handles.push(tokio::spawn(event_task(
            self.clone(),
            hub.clone(),
            events,
            session.clone(),
        )));
        handles.push(tokio::spawn(health_task(
            self.clone(),
            hub.clone(),
            session.clone(),
        )));
        handles.push(tokio::spawn(push_forward_task(self.clone(), pushes, session)));
        Ok(())
    }

    /// Application-level handshake on a live transport: exchange
    /// session info, apply version verdicts, run the initial loads.
    async fn establish_session(&self, hub: &HubConnection) -> Result<SessionInfo, CoreError> {
        let info: SessionInfo = hub.invoke("SessionInfo", &()).await?;
        debug!(
            server = %info.server_name,
            online = info.online_users,
            "session info received"
        );
        self.set_state(ConnectionState::Connected);
        self.check_versions(&info)?;
        self.inner.host.load_pairs().await?;
        self.inner.host.load_online().await?;
        if let Ok(Some(token)) = self.inner.tokens.token().await {
            self.inner.last_token.store(Some(Arc::new(token)));
        }
        Ok(info)
    }

    fn check_versions(&self, info: &SessionInfo) -> Result<(), CoreError> {
        if info.server_version != API_VERSION {
            if info.server_version > API_VERSION {
                self.notify(Notification::warning(
                    "Client outdated",
                    "The server speaks a newer protocol than this client. \
                     Update the client to reconnect.",
                ));
            } else {
                self.notify(Notification::error(
                    "Server incompatible",
                    "The server speaks an older protocol than this client supports.",
                ));
            }
            return Err(CoreError::VersionMismatch {
                server: info.server_version,
                local: API_VERSION,
            });
        }
        if info.min_client_version > self.inner.config.client_version {
            warn!(
                minimum = %info.min_client_version,
                local = %self.inner.config.client_version,
                "client below the server's minimum version"
            );
            self.notify(Notification::warning(
                "Update recommended",
                format!(
                    "The server expects client {} or newer; some features may misbehave.",
                    info.min_client_version
                ),
            ));
        }
        Ok(())
    }

    /// Credential revoked or rejected: stop trying until the user acts.
    async fn force_unauthorized(&self) {
        self.inner.attempt_cancel.lock().await.cancel();
        self.teardown().await;
        self.set_state(ConnectionState::Unauthorized);
    }
}

// ── Background tasks ────────────────────────────────────────────────

/// Drive connect attempts until one sticks or a terminal error stops
/// the cycle. Each iteration starts from a clean slate.
async fn connection_loop(sup: SyncSupervisor, cancel: CancellationToken) {
    loop {
        sup.teardown().await;
        if cancel.is_cancelled() {
            return;
        }

        sup.set_state(ConnectionState::Connecting);
        if !wait_for_player(&sup, &cancel).await {
            return;
        }

        match sup.connect_once(&cancel).await {
            Ok(()) => {
                info!("session established");
                return;
            }
            Err(CoreError::Cancelled) => return,
            Err(e) if e.is_auth_failure() => {
                warn!(error = %e, "authentication rejected");
                sup.inner.factory.dispose_hub().await;
                sup.set_state(ConnectionState::Unauthorized);
                return;
            }
            Err(e @ CoreError::ClockSkew { .. }) => {
                warn!(error = %e, "clock skew, not retrying");
                sup.inner.factory.dispose_hub().await;
                sup.set_state(ConnectionState::Offline);
                return;
            }
            Err(CoreError::VersionMismatch { server, local }) => {
                warn!(server, local, "protocol version mismatch");
                sup.inner.factory.dispose_hub().await;
                sup.set_state(ConnectionState::VersionMismatch);
                return;
            }
            Err(CoreError::RateLimited) => {
                warn!("rate limited by the server, backing off");
                sup.set_state(ConnectionState::RateLimited);
                if !backoff(&cancel, RATE_LIMIT_BACKOFF_SECS).await {
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "connect attempt failed, retrying");
                sup.set_state(ConnectionState::Reconnecting);
                if !backoff(&cancel, RECONNECT_BACKOFF_SECS).await {
                    return;
                }
            }
        }
    }
}

/// Poll until the player character is present. Returns `false` when
/// cancelled first.
async fn wait_for_player(sup: &SyncSupervisor, cancel: &CancellationToken) -> bool {
    if sup.inner.host.is_player_present().await {
        return true;
    }
    debug!("waiting for the player before connecting");
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return false,
            () = tokio::time::sleep(PLAYER_POLL_INTERVAL) => {}
        }
        if sup.inner.host.is_player_present().await {
            return true;
        }
    }
}

/// Sleep a jittered delay from `range`. Returns `false` when cancelled.
async fn backoff(cancel: &CancellationToken, range: RangeInclusive<u64>) -> bool {
    let delay = Duration::from_secs(rand::rng().random_range(range));
    debug!(?delay, "backing off before the next attempt");
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

/// React to hub lifecycle events for one established session.
async fn event_task(
    sup: SyncSupervisor,
    hub: HubConnection,
    mut events: broadcast::Receiver<HubEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            event = events.recv() => event,
        };
        match event {
            Ok(HubEvent::Reconnecting { reason }) => {
                warn!(%reason, "hub transport lost, reconnecting");
                sup.set_state(ConnectionState::Reconnecting);
                sup.notify(Notification::warning(
                    "Connection lost",
                    "Connection to the server was interrupted. Reconnecting.",
                ));
            }
            Ok(HubEvent::Reconnected) => {
                // Resync quietly; the initial connect already announced
                // itself.
                match sup.establish_session(&hub).await {
                    Ok(_) => info!("session resynchronized after reconnect"),
                    Err(CoreError::VersionMismatch { server, local }) => {
                        warn!(server, local, "version mismatch after reconnect");
                        sup.teardown().await;
                        sup.set_state(ConnectionState::VersionMismatch);
                        return;
                    }
                    Err(e) => {
                        warn!(error = %e, "resync failed, restarting the connection");
                        sup.restart().await;
                        return;
                    }
                }
            }
            Ok(HubEvent::Closed { reason }) => {
                info!(%reason, "hub closed the session");
                sup.teardown().await;
                sup.set_state(ConnectionState::Offline);
                sup.notify(Notification::info(
                    "Disconnected",
                    "Connection to the server was closed.",
                ));
                return;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "hub event stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Heartbeat and credential freshness checks for one session.
async fn health_task(sup: SyncSupervisor, hub: HubConnection, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(sup.inner.config.health_interval);
    interval.tick().await; // consume the immediate first tick
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }
        if !hub.is_connected() {
            // Mid-reconnect; the hub's retry policy owns this window.
            continue;
        }
        if let Err(e) = hub.invoke_unit("Heartbeat", &()).await {
            warn!(error = %e, "heartbeat failed");
            continue;
        }
        if !sup.inner.tokens.cached_token_needs_renewal().await {
            continue;
        }
        match sup.inner.tokens.get_or_update_token(&cancel).await {
            Ok(Some(fresh)) => {
                let last = sup.inner.last_token.load_full();
                if last.as_deref() != Some(&fresh) {
                    info!("credential rotated, reconnecting with the fresh token");
                    sup.restart().await;
                    return;
                }
            }
            Ok(None) => {}
            Err(e) if e.is_auth_failure() => {
                warn!(error = %e, "credential renewal rejected");
                sup.force_unauthorized().await;
                return;
            }
            Err(e) => warn!(error = %e, "credential renewal failed"),
        }
    }
}

/// Forward hub pushes into the supervisor-level channel so consumers
/// keep one stable subscription across restarts.
async fn push_forward_task(
    sup: SyncSupervisor,
    mut pushes: broadcast::Receiver<Arc<PushMessage>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            message = pushes.recv() => match message {
                Ok(message) => {
                    let _ = sup.inner.push_tx.send(message);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "push stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

/// Republish token-layer events as notifications. A revocation forces
/// the session into `Unauthorized`.
async fn api_event_task(
    sup: SyncSupervisor,
    mut events: broadcast::Receiver<ApiEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            event = events.recv() => event,
        };
        match event {
            Ok(ApiEvent::Notice(notification)) => sup.notify(notification),
            Ok(ApiEvent::AuthRevoked) => {
                warn!("credential revoked by the server");
                sup.force_unauthorized().await;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "auth event stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
