//! The hub connection: negotiation, transport dialing, framing, and
//! in-session reconnection.
//!
//! A [`HubConnection`] is started once and then drives itself. When the
//! transport drops mid-session it renegotiates under its
//! [`RetryPolicy`], emitting [`HubEvent`]s so the owner can track the
//! lifecycle. A stopped or disposed connection is finished for good;
//! callers build a new one instead of restarting it.
//!
//! ```rust,ignore
//! let hub = HubConnection::new(http, config, cancel.child_token());
//! hub.start().await?;
//! let info: SessionInfo = hub.invoke("SessionInfo", &()).await?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::{ClientRequestBuilder, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::Error;
use crate::events::HubEvent;
use crate::hub::negotiate::negotiate;
use crate::hub::retry::{ForeverRetry, RetryPolicy};
use crate::hub::transports::{TransportKind, TransportSet};
use crate::hub::wire::{Frame, WIRE_VERSION, decode_frame, encode_frame};
use crate::transport::{USER_AGENT, http_base, join_path, sanitize_header_value, ws_base};

const OUTBOUND_CHANNEL_CAPACITY: usize = 64;
const INBOUND_CHANNEL_CAPACITY: usize = 64;
const PUSH_CHANNEL_CAPACITY: usize = 256;
const EVENT_CHANNEL_CAPACITY: usize = 32;

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a single poll request may hang before we re-issue it.
/// Overrides the client-wide timeout, which is far too short for long
/// polling.
const LONG_POLL_TIMEOUT: Duration = Duration::from_secs(100);

/// Produces the bearer credential for negotiation and transport dialing.
///
/// Called before every connect attempt, including in-session
/// reconnects, so renewed tokens are picked up without tearing the
/// connection object down. `Ok(None)` dials anonymously.
pub type AccessTokenFn =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Option<String>, Error>> + Send + Sync>;

/// A server-initiated message delivered outside the invoke cycle.
#[derive(Debug, Clone)]
pub struct PushMessage {
    pub target: String,
    pub payload: Vec<u8>,
}

// ── Configuration ────────────────────────────────────────────────────

#[derive(Clone)]
pub struct HubConfig {
    /// Hub endpoint. Accepts ws/wss or http/https; schemes are rewritten
    /// per transport.
    pub url: Url,
    /// Candidate transports, best first.
    pub transports: TransportSet,
    pub access_token: AccessTokenFn,
    /// Static credential sent as `X-Api-Key` on negotiation and every
    /// transport request. Sanitized before use.
    pub api_key: Option<SecretString>,
    pub retry: Arc<dyn RetryPolicy>,
    pub handshake_timeout: Duration,
    pub invoke_timeout: Duration,
}

impl HubConfig {
    pub fn new(url: Url, access_token: AccessTokenFn) -> Self {
        Self {
            url,
            transports: TransportSet::of(&[TransportKind::Streaming, TransportKind::LongPoll]),
            access_token,
            api_key: None,
            retry: Arc::new(ForeverRetry),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            invoke_timeout: DEFAULT_INVOKE_TIMEOUT,
        }
    }
}

// ── Connection handle ────────────────────────────────────────────────

type CompletionResult = Result<Option<Vec<u8>>, String>;

struct HubInner {
    config: HubConfig,
    http: reqwest::Client,
    cancel: CancellationToken,
    connected: AtomicBool,
    disposed: AtomicBool,
    transport_kind: ArcSwapOption<TransportKind>,
    next_invocation_id: AtomicU32,
    pending: DashMap<u32, oneshot::Sender<CompletionResult>>,
    outbound_tx: mpsc::Sender<Frame>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Frame>>>,
    push_tx: broadcast::Sender<Arc<PushMessage>>,
    events_tx: broadcast::Sender<HubEvent>,
    run_handle: Mutex<Option<JoinHandle<()>>>,
}

/// Cheap-to-clone handle to one live hub session.
///
/// All clones share the same underlying connection; [`same_instance`]
/// tells two handles to the same session apart from two sessions.
///
/// [`same_instance`]: HubConnection::same_instance
#[derive(Clone)]
pub struct HubConnection {
    inner: Arc<HubInner>,
}

impl HubConnection {
    pub fn new(http: reqwest::Client, config: HubConfig, cancel: CancellationToken) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let (push_tx, _) = broadcast::channel(PUSH_CHANNEL_CAPACITY);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(HubInner {
                config,
                http,
                cancel,
                connected: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                transport_kind: ArcSwapOption::empty(),
                next_invocation_id: AtomicU32::new(1),
                pending: DashMap::new(),
                outbound_tx,
                outbound_rx: Mutex::new(Some(outbound_rx)),
                push_tx,
                events_tx,
                run_handle: Mutex::new(None),
            }),
        }
    }

    /// Negotiate, dial, handshake, and spawn the session loop.
    ///
    /// On failure the connection is left startable, so a caller may try
    /// again with the same instance.
    pub async fn start(&self) -> Result<(), Error> {
        if self.is_disposed() {
            return Err(Error::HubClosed {
                reason: "connection disposed".to_string(),
            });
        }
        let Some(outbound_rx) = self.inner.outbound_rx.lock().await.take() else {
            return Err(Error::HubClosed {
                reason: "connection already started".to_string(),
            });
        };

        let transport = match Self::establish(&self.inner).await {
            Ok(transport) => transport,
            Err(e) => {
                *self.inner.outbound_rx.lock().await = Some(outbound_rx);
                return Err(e);
            }
        };

        let handle = tokio::spawn(Self::run_loop(self.inner.clone(), transport, outbound_rx));
        *self.inner.run_handle.lock().await = Some(handle);
        Ok(())
    }

    /// Invoke a hub method and decode its completion result.
    pub async fn invoke<T, A>(&self, target: &str, args: &A) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
        A: serde::Serialize + Sync + ?Sized,
    {
        let payload = rmp_serde::to_vec_named(args)?;
        let result = self.invoke_raw(target, payload).await?;
        let bytes = result.ok_or_else(|| Error::Invocation {
            target: target.to_string(),
            message: "completion carried no result".to_string(),
        })?;
        Ok(rmp_serde::from_slice(&bytes)?)
    }

    /// Invoke a hub method, waiting for its completion but discarding
    /// any result.
    pub async fn invoke_unit<A>(&self, target: &str, args: &A) -> Result<(), Error>
    where
        A: serde::Serialize + Sync + ?Sized,
    {
        let payload = rmp_serde::to_vec_named(args)?;
        self.invoke_raw(target, payload).await.map(|_| ())
    }

    /// Invoke with a pre-encoded payload.
    pub async fn invoke_raw(
        &self,
        target: &str,
        payload: Vec<u8>,
    ) -> Result<Option<Vec<u8>>, Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let id = self.inner.next_invocation_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(id, tx);

        let frame = Frame::Invocation {
            id,
            target: target.to_string(),
            payload,
        };
        if self.inner.outbound_tx.send(frame).await.is_err() {
            self.inner.pending.remove(&id);
            return Err(Error::NotConnected);
        }

        match tokio::time::timeout(self.inner.config.invoke_timeout, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(message))) => Err(Error::Invocation {
                target: target.to_string(),
                message,
            }),
            // Sender dropped: the session went down with the call in
            // flight.
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => {
                self.inner.pending.remove(&id);
                Err(Error::Invocation {
                    target: target.to_string(),
                    message: "invocation timed out".to_string(),
                })
            }
        }
    }

    /// Send a one-way message with no completion.
    pub async fn send<A>(&self, target: &str, args: &A) -> Result<(), Error>
    where
        A: serde::Serialize + Sync + ?Sized,
    {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let payload = rmp_serde::to_vec_named(args)?;
        let frame = Frame::Push {
            target: target.to_string(),
            payload,
        };
        self.inner
            .outbound_tx
            .send(frame)
            .await
            .map_err(|_| Error::NotConnected)
    }

    /// Subscribe to server pushes.
    pub fn pushes(&self) -> broadcast::Receiver<Arc<PushMessage>> {
        self.inner.push_tx.subscribe()
    }

    /// Subscribe to lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<HubEvent> {
        self.inner.events_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// The transport currently carrying the session, if any.
    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.inner.transport_kind.load_full().map(|kind| *kind)
    }

    /// Whether two handles refer to the same underlying session.
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Shut the session down and announce the closure to event
    /// subscribers. Idempotent; the connection cannot be started again.
    pub async fn stop(&self, reason: &str) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(reason, "stopping hub connection");
        self.inner.cancel.cancel();
        self.join_run_loop().await;
        self.inner.connected.store(false, Ordering::SeqCst);
        let _ = self.inner.events_tx.send(HubEvent::Closed {
            reason: reason.to_string(),
        });
    }

    /// Tear the session down silently. Used when the owner is about to
    /// replace this connection and handles its own announcements.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("disposing hub connection");
        self.inner.cancel.cancel();
        self.join_run_loop().await;
        self.inner.connected.store(false, Ordering::SeqCst);
    }

    async fn join_run_loop(&self) {
        let handle = self.inner.run_handle.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    // ── Establishment ────────────────────────────────────────────────

    /// Negotiate and dial candidates in priority order, completing the
    /// wire handshake on the first transport that answers.
    async fn establish(inner: &Arc<HubInner>) -> Result<ActiveTransport, Error> {
        let token = (inner.config.access_token)().await?;
        let api_key = inner
            .config
            .api_key
            .as_ref()
            .map(|key| sanitize_header_value(key.expose_secret()));
        let outcome = negotiate(
            &inner.http,
            &inner.config.url,
            token.as_deref(),
            api_key.as_deref(),
            inner.config.transports,
            &inner.cancel,
        )
        .await?;
        let connect_url = outcome
            .redirect
            .unwrap_or_else(|| inner.config.url.clone());

        let mut last_err = Error::NoUsableTransport;
        for kind in outcome.transports {
            debug!(transport = %kind, url = %connect_url, "dialing");
            let dialed = match kind {
                TransportKind::Streaming => {
                    Self::dial_websocket(
                        inner,
                        &connect_url,
                        &outcome.connection_id,
                        token.as_deref(),
                        api_key.as_deref(),
                    )
                    .await
                }
                TransportKind::LongPoll => Self::dial_long_poll(
                    inner,
                    &connect_url,
                    &outcome.connection_id,
                    token.as_deref(),
                    api_key.as_deref(),
                ),
                // Recognized but never dialed.
                TransportKind::ServerPush => continue,
            };

            let mut transport = match dialed {
                Ok(transport) => transport,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!(transport = %kind, error = %e, "dial failed");
                    last_err = e;
                    continue;
                }
            };

            match Self::handshake(inner, &mut transport).await {
                Ok(()) => {
                    inner.connected.store(true, Ordering::SeqCst);
                    inner.transport_kind.store(Some(Arc::new(kind)));
                    info!(transport = %kind, "hub connection established");
                    return Ok(transport);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!(transport = %kind, error = %e, "handshake failed");
                    transport.close().await;
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    async fn dial_websocket(
        inner: &Arc<HubInner>,
        connect_url: &Url,
        connection_id: &str,
        token: Option<&str>,
        api_key: Option<&str>,
    ) -> Result<ActiveTransport, Error> {
        let mut url = ws_base(connect_url)?;
        url.query_pairs_mut().append_pair("id", connection_id);
        let uri: Uri = url
            .as_str()
            .parse()
            .map_err(|e| Error::WebSocketConnect(format!("bad URI: {e}")))?;

        let mut request = ClientRequestBuilder::new(uri).with_header("User-Agent", USER_AGENT);
        if let Some(token) = token {
            request = request.with_header("Authorization", format!("Bearer {token}"));
        }
        if let Some(api_key) = api_key {
            request = request.with_header("X-Api-Key", api_key);
        }

        let (stream, _response) = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => return Err(Error::Cancelled),
            result = connect_async(request) => {
                result.map_err(|e| Error::WebSocketConnect(e.to_string()))?
            }
        };

        let (sink, source) = stream.split();
        Ok(ActiveTransport {
            kind: TransportKind::Streaming,
            sink: TransportSink::Ws(sink),
            source: TransportSource::Ws(source),
        })
    }

    fn dial_long_poll(
        inner: &Arc<HubInner>,
        connect_url: &Url,
        connection_id: &str,
        token: Option<&str>,
        api_key: Option<&str>,
    ) -> Result<ActiveTransport, Error> {
        let base = http_base(connect_url)?;
        let mut poll_url = join_path(&base, "poll")?;
        poll_url.query_pairs_mut().append_pair("id", connection_id);
        let mut send_url = join_path(&base, "send")?;
        send_url.query_pairs_mut().append_pair("id", connection_id);
        let bearer = token.map(str::to_string);
        let api_key = api_key.map(str::to_string);

        Ok(ActiveTransport {
            kind: TransportKind::LongPoll,
            sink: TransportSink::LongPoll(LongPollLane {
                http: inner.http.clone(),
                url: send_url,
                bearer: bearer.clone(),
                api_key: api_key.clone(),
            }),
            source: TransportSource::LongPoll(LongPollLane {
                http: inner.http.clone(),
                url: poll_url,
                bearer,
                api_key,
            }),
        })
    }

    /// Exchange handshake frames on a freshly dialed transport.
    async fn handshake(
        inner: &Arc<HubInner>,
        transport: &mut ActiveTransport,
    ) -> Result<(), Error> {
        transport
            .send(encode_frame(&Frame::Handshake {
                version: WIRE_VERSION,
            })?)
            .await?;

        let wait_for_ack = async {
            loop {
                let Some(bytes) = transport.recv().await? else {
                    return Err(Error::Handshake {
                        message: "transport closed during handshake".to_string(),
                    });
                };
                match decode_frame(&bytes)? {
                    Frame::HandshakeAck => return Ok(()),
                    Frame::Ping => {}
                    Frame::Close { reason, .. } => {
                        return Err(Error::Handshake { message: reason });
                    }
                    other => {
                        return Err(Error::Handshake {
                            message: format!("unexpected frame {other:?}"),
                        });
                    }
                }
            }
        };

        tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(inner.config.handshake_timeout, wait_for_ack) => {
                match result {
                    Ok(outcome) => outcome,
                    Err(_) => Err(Error::Handshake {
                        message: "timed out waiting for acknowledgement".to_string(),
                    }),
                }
            }
        }
    }

    // ── Session loop ─────────────────────────────────────────────────

    async fn run_loop(
        inner: Arc<HubInner>,
        mut transport: ActiveTransport,
        mut outbound_rx: mpsc::Receiver<Frame>,
    ) {
        loop {
            let exit = Self::pump(&inner, transport, &mut outbound_rx).await;
            inner.connected.store(false, Ordering::SeqCst);
            inner.transport_kind.store(None);
            // Drop all pending completions; their callers get
            // NotConnected.
            inner.pending.clear();

            let reason = match exit {
                PumpExit::Cancelled => return,
                PumpExit::ServerClose {
                    reason,
                    allow_reconnect: false,
                } => {
                    info!(reason = %reason, "hub closed the connection");
                    let _ = inner.events_tx.send(HubEvent::Closed { reason });
                    return;
                }
                PumpExit::ServerClose {
                    reason,
                    allow_reconnect: true,
                }
                | PumpExit::Dropped(reason) => reason,
            };

            warn!(reason = %reason, "connection lost, reconnecting");
            let _ = inner.events_tx.send(HubEvent::Reconnecting { reason });

            match Self::reconnect(&inner).await {
                Ok(fresh) => {
                    let _ = inner.events_tx.send(HubEvent::Reconnected);
                    transport = fresh;
                }
                Err(ReconnectAbort::Cancelled) => return,
                Err(ReconnectAbort::GaveUp(reason)) => {
                    warn!(reason = %reason, "giving up on reconnection");
                    let _ = inner.events_tx.send(HubEvent::Closed { reason });
                    return;
                }
            }
        }
    }

    /// Drive one established transport until it drops, the server says
    /// goodbye, or we are cancelled.
    async fn pump(
        inner: &Arc<HubInner>,
        transport: ActiveTransport,
        outbound_rx: &mut mpsc::Receiver<Frame>,
    ) -> PumpExit {
        let ActiveTransport {
            mut sink,
            mut source,
            ..
        } = transport;

        // Receive on a dedicated task. Long polling must never have its
        // in-flight request dropped by a send racing it in a select, or
        // a delivered frame is lost.
        let (frame_tx, mut frame_rx) =
            mpsc::channel::<Result<Option<Vec<u8>>, Error>>(INBOUND_CHANNEL_CAPACITY);
        let reader_cancel = inner.cancel.child_token();
        let reader = tokio::spawn({
            let cancel = reader_cancel.clone();
            async move {
                loop {
                    let item = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        item = source.recv() => item,
                    };
                    let done = matches!(item, Ok(None) | Err(_));
                    if frame_tx.send(item).await.is_err() || done {
                        break;
                    }
                }
            }
        });

        let exit = loop {
            tokio::select! {
                biased;
                _ = inner.cancel.cancelled() => break PumpExit::Cancelled,
                maybe_frame = outbound_rx.recv() => match maybe_frame {
                    Some(frame) => {
                        let bytes = match encode_frame(&frame) {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                warn!(error = %e, "dropping unencodable frame");
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(bytes).await {
                            break PumpExit::Dropped(e.to_string());
                        }
                    }
                    // Every handle is gone; nobody can talk to us again.
                    None => break PumpExit::Cancelled,
                },
                incoming = frame_rx.recv() => match incoming {
                    Some(Ok(Some(bytes))) => match decode_frame(&bytes) {
                        Err(e) => warn!(error = %e, "discarding undecodable frame"),
                        Ok(Frame::Ping) => {
                            if let Ok(reply) = encode_frame(&Frame::Ping) {
                                let _ = sink.send(reply).await;
                            }
                        }
                        Ok(Frame::Completion { id, result, error }) => {
                            if let Some((_, tx)) = inner.pending.remove(&id) {
                                let _ = tx.send(match error {
                                    Some(message) => Err(message),
                                    None => Ok(result),
                                });
                            } else {
                                debug!(id, "completion for unknown invocation");
                            }
                        }
                        Ok(Frame::Push { target, payload }) => {
                            let _ = inner.push_tx.send(Arc::new(PushMessage { target, payload }));
                        }
                        Ok(Frame::Close { reason, allow_reconnect }) => {
                            break PumpExit::ServerClose { reason, allow_reconnect };
                        }
                        Ok(other) => debug!(frame = ?other, "ignoring unexpected frame"),
                    },
                    Some(Ok(None)) => break PumpExit::Dropped("transport closed".to_string()),
                    Some(Err(e)) => break PumpExit::Dropped(e.to_string()),
                    None => break PumpExit::Dropped("receiver stopped".to_string()),
                },
            }
        };

        reader_cancel.cancel();
        sink.close().await;
        reader.abort();
        exit
    }

    /// Re-establish under the retry policy after an in-session drop.
    async fn reconnect(inner: &Arc<HubInner>) -> Result<ActiveTransport, ReconnectAbort> {
        let mut attempt: u32 = 0;
        loop {
            let Some(delay) = inner.config.retry.next_delay(attempt) else {
                return Err(ReconnectAbort::GaveUp("retry policy exhausted".to_string()));
            };
            if !delay.is_zero() {
                debug!(attempt, delay_secs = delay.as_secs(), "waiting before reconnect");
                tokio::select! {
                    biased;
                    _ = inner.cancel.cancelled() => return Err(ReconnectAbort::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            attempt += 1;

            match Self::establish(inner).await {
                Ok(transport) => return Ok(transport),
                Err(Error::Cancelled) => return Err(ReconnectAbort::Cancelled),
                Err(e) if e.is_auth_failure() => {
                    return Err(ReconnectAbort::GaveUp(format!("authentication failed: {e}")));
                }
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                }
            }
        }
    }
}

enum PumpExit {
    Cancelled,
    Dropped(String),
    ServerClose {
        reason: String,
        allow_reconnect: bool,
    },
}

enum ReconnectAbort {
    Cancelled,
    GaveUp(String),
}

// ── Transports ───────────────────────────────────────────────────────

struct ActiveTransport {
    kind: TransportKind,
    sink: TransportSink,
    source: TransportSource,
}

impl ActiveTransport {
    async fn send(&mut self, message: Vec<u8>) -> Result<(), Error> {
        self.sink.send(message).await
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, Error> {
        self.source.recv().await
    }

    async fn close(&mut self) {
        debug!(transport = %self.kind, "closing transport");
        self.sink.close().await;
    }
}

#[derive(Clone)]
struct LongPollLane {
    http: reqwest::Client,
    url: Url,
    bearer: Option<String>,
    api_key: Option<String>,
}

impl LongPollLane {
    fn authorize(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(bearer) = &self.bearer {
            request = request.bearer_auth(bearer);
        }
        if let Some(api_key) = &self.api_key {
            request = request.header("X-Api-Key", api_key);
        }
        request
    }
}

enum TransportSink {
    Ws(SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>),
    LongPoll(LongPollLane),
}

impl TransportSink {
    async fn send(&mut self, message: Vec<u8>) -> Result<(), Error> {
        match self {
            Self::Ws(sink) => sink
                .send(Message::Binary(Bytes::from(message)))
                .await
                .map_err(|e| Error::WebSocketConnect(e.to_string())),
            Self::LongPoll(lane) => {
                let request = lane.authorize(lane.http.post(lane.url.clone())).body(message);
                request.send().await?.error_for_status()?;
                Ok(())
            }
        }
    }

    async fn close(&mut self) {
        if let Self::Ws(sink) = self {
            let _ = sink.close().await;
        }
    }
}

enum TransportSource {
    Ws(SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>),
    LongPoll(LongPollLane),
}

impl TransportSource {
    /// Receive the next frame. `Ok(None)` is an orderly close.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, Error> {
        match self {
            Self::Ws(stream) => loop {
                match stream.next().await {
                    None => return Ok(None),
                    Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
                    Some(Ok(Message::Binary(bytes))) => return Ok(Some(bytes.to_vec())),
                    Some(Ok(Message::Close(_))) => return Ok(None),
                    // Text, ping, and pong frames are not part of the
                    // protocol; the library answers pings for us.
                    Some(Ok(_)) => {}
                }
            },
            Self::LongPoll(lane) => loop {
                let request = lane
                    .authorize(lane.http.get(lane.url.clone()))
                    .timeout(LONG_POLL_TIMEOUT);
                let response = match request.send().await {
                    Ok(response) => response,
                    // An idle poll timing out is routine; go again.
                    Err(e) if e.is_timeout() => continue,
                    Err(e) => return Err(Error::Transport(e)),
                };

                let status = response.status();
                if status == reqwest::StatusCode::NO_CONTENT {
                    continue;
                }
                if status == reqwest::StatusCode::NOT_FOUND
                    || status == reqwest::StatusCode::GONE
                {
                    return Ok(None);
                }
                let response = response.error_for_status()?;
                let bytes = response.bytes().await?;
                if bytes.is_empty() {
                    continue;
                }
                return Ok(Some(bytes.to_vec()));
            },
        }
    }
}
