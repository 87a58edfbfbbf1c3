//! WebSocket connection manager.
//!
//! Owns the single logical channel: connection lifecycle, automatic
//! reconnection with exponential backoff, identity rebinding, and room
//! restoration after every reconnect.

use crate::error::{WsError, WsResult};
use crate::health::HealthMonitor;
use crate::message::InboundMessage;
use crate::subscription::SubscriptionRegistry;
use crate::ws_write_handle::{WsOutbound, WsWriteHandle};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use orderlink_core::Identity;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL.
    pub url: String,
    /// Base delay for exponential backoff.
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay for exponential backoff.
    pub reconnect_max_delay_ms: u64,
    /// Upper bound of random jitter added to each backoff delay.
    pub reconnect_jitter_ms: u64,
    /// Idle time before a liveness ping is sent.
    pub heartbeat_interval_ms: u64,
    /// Pong must arrive within this.
    pub heartbeat_timeout_ms: u64,
    /// Capacity of the outbound frame queue.
    pub outbound_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 30000,
            reconnect_jitter_ms: 1000,
            heartbeat_interval_ms: 25000,
            heartbeat_timeout_ms: 10000,
            outbound_buffer: 100,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Id of the live transport session.
    pub channel_id: Option<String>,
    pub identity: Option<Identity>,
    /// Consecutive reconnect attempts since the last successful connect.
    pub reconnect_attempts: u32,
}

/// Event forwarded from the channel to the dispatch loop.
///
/// Connection signals and inbound messages share one queue so they are
/// consumed in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A transport session became live and the room join was sent.
    Connected {
        channel_id: String,
        identity: Identity,
    },
    /// The session ended (drop, liveness failure, or explicit disconnect).
    Disconnected { channel_id: String, reason: String },
    /// Data message from the server.
    Message(InboundMessage),
}

/// Handle returned by `connect()`.
#[derive(Clone)]
pub struct ConnectionHandle {
    identity: Identity,
    write: WsWriteHandle,
}

impl ConnectionHandle {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn write_handle(&self) -> &WsWriteHandle {
        &self.write
    }

    pub fn is_connected(&self) -> bool {
        self.write.is_connected()
    }
}

struct Session {
    identity: Identity,
    shutdown_token: CancellationToken,
    task: JoinHandle<()>,
}

/// WebSocket connection manager.
pub struct ConnectionManager {
    config: ConnectionConfig,
    state: Arc<RwLock<ConnectionState>>,
    channel_id: Arc<RwLock<Option<String>>>,
    identity: Arc<RwLock<Option<Identity>>>,
    reconnect_count: Arc<RwLock<u32>>,
    subscriptions: Arc<SubscriptionRegistry>,
    health: Arc<HealthMonitor>,
    event_tx: mpsc::Sender<ChannelEvent>,
    /// Outbound message sender (for WsWriteHandle).
    outbound_tx: mpsc::Sender<WsOutbound>,
    /// Outbound message receiver (consumed by the session loop).
    outbound_rx: Arc<TokioMutex<mpsc::Receiver<WsOutbound>>>,
    session: TokioMutex<Option<Session>>,
}

impl ConnectionManager {
    /// Create a new connection manager forwarding channel events to `event_tx`.
    pub fn new(config: ConnectionConfig, event_tx: mpsc::Sender<ChannelEvent>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_buffer.max(1));
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));
        let write = WsWriteHandle::new(outbound_tx.clone(), state.clone());

        Self {
            health: Arc::new(HealthMonitor::new(
                config.heartbeat_interval_ms,
                config.heartbeat_timeout_ms,
                write.clone(),
            )),
            subscriptions: Arc::new(SubscriptionRegistry::new(write)),
            config,
            state,
            channel_id: Arc::new(RwLock::new(None)),
            identity: Arc::new(RwLock::new(None)),
            reconnect_count: Arc::new(RwLock::new(0)),
            event_tx,
            outbound_tx,
            outbound_rx: Arc::new(TokioMutex::new(outbound_rx)),
            session: TokioMutex::new(None),
        }
    }

    /// Get a write handle for sending messages.
    ///
    /// The write handle can be cloned and shared across tasks.
    pub fn write_handle(&self) -> WsWriteHandle {
        WsWriteHandle::new(self.outbound_tx.clone(), self.state.clone())
    }

    pub fn subscriptions(&self) -> Arc<SubscriptionRegistry> {
        self.subscriptions.clone()
    }

    pub fn health(&self) -> Arc<HealthMonitor> {
        self.health.clone()
    }

    /// Get current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Connection snapshot.
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: *self.state.read(),
            channel_id: self.channel_id.read().clone(),
            identity: self.identity.read().clone(),
            reconnect_attempts: *self.reconnect_count.read(),
        }
    }

    /// Bind the channel to `identity` and start the session loop.
    ///
    /// A no-op returning the existing handle when already running for the
    /// same identity. A different identity tears the current session down
    /// first; a channel is never shared across identities.
    pub async fn connect(&self, identity: Identity) -> WsResult<ConnectionHandle> {
        if self.config.url.is_empty() {
            return Err(WsError::ConnectionFailed("no channel url configured".to_string()));
        }

        let mut session = self.session.lock().await;

        if let Some(current) = session.as_ref() {
            if current.identity == identity && !current.task.is_finished() {
                debug!(%identity, "Already connected with this identity");
                return Ok(self.handle_for(identity));
            }
        }

        if let Some(previous) = session.take() {
            info!(from = %previous.identity, to = %identity, "Identity changed, disconnecting first");
            let identity_changed = previous.identity != identity;
            self.stop_session(previous).await;
            if identity_changed {
                self.subscriptions.clear_intent();
            }
        }

        *self.identity.write() = Some(identity.clone());
        *self.reconnect_count.write() = 0;

        let shutdown_token = CancellationToken::new();
        let worker = SessionWorker {
            config: self.config.clone(),
            identity: identity.clone(),
            state: self.state.clone(),
            channel_id: self.channel_id.clone(),
            reconnect_count: self.reconnect_count.clone(),
            subscriptions: self.subscriptions.clone(),
            health: self.health.clone(),
            event_tx: self.event_tx.clone(),
            outbound_rx: self.outbound_rx.clone(),
            shutdown_token: shutdown_token.clone(),
        };
        let task = tokio::spawn(worker.run());

        *session = Some(Session {
            identity: identity.clone(),
            shutdown_token,
            task,
        });

        Ok(self.handle_for(identity))
    }

    /// Close the channel. Reachable from any state; always lands in `Disconnected`.
    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        if let Some(current) = session.take() {
            info!(identity = %current.identity, "Disconnect requested");
            self.stop_session(current).await;
        }
        *self.identity.write() = None;
        *self.channel_id.write() = None;
        *self.state.write() = ConnectionState::Disconnected;
    }

    async fn stop_session(&self, session: Session) {
        session.shutdown_token.cancel();
        if let Err(e) = session.task.await {
            error!(?e, "Session task ended abnormally");
        }
    }

    fn handle_for(&self, identity: Identity) -> ConnectionHandle {
        ConnectionHandle {
            identity,
            write: self.write_handle(),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.shutdown_token.cancel();
        }
    }
}

/// Connect/reconnect loop for one identity.
struct SessionWorker {
    config: ConnectionConfig,
    identity: Identity,
    state: Arc<RwLock<ConnectionState>>,
    channel_id: Arc<RwLock<Option<String>>>,
    reconnect_count: Arc<RwLock<u32>>,
    subscriptions: Arc<SubscriptionRegistry>,
    health: Arc<HealthMonitor>,
    event_tx: mpsc::Sender<ChannelEvent>,
    outbound_rx: Arc<TokioMutex<mpsc::Receiver<WsOutbound>>>,
    shutdown_token: CancellationToken,
}

impl SessionWorker {
    async fn run(self) {
        loop {
            if self.shutdown_token.is_cancelled() {
                info!("Shutdown requested, exiting connect loop");
                *self.state.write() = ConnectionState::Disconnected;
                return;
            }

            *self.state.write() = ConnectionState::Connecting;

            match self.try_connect().await {
                Ok(()) => info!("WebSocket session closed"),
                Err(e) => error!(%e, "WebSocket session error"),
            }

            if self.shutdown_token.is_cancelled() {
                info!("Shutdown requested after disconnect, not reconnecting");
                *self.state.write() = ConnectionState::Disconnected;
                return;
            }

            let attempt = {
                let mut count = self.reconnect_count.write();
                *count = count.saturating_add(1);
                *count
            };
            *self.state.write() = ConnectionState::Reconnecting;

            let delay = backoff_delay(&self.config, attempt);
            warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown requested during backoff, exiting");
                    *self.state.write() = ConnectionState::Disconnected;
                    return;
                }
            }
        }
    }

    async fn try_connect(&self) -> WsResult<()> {
        info!(url = %self.config.url, identity = %self.identity, "Connecting to WebSocket");

        let connect = connect_async_tls_with_config(&self.config.url, None, true, None);
        let (ws_stream, _response) = tokio::select! {
            result = connect => result?,
            () = self.shutdown_token.cancelled() => return Ok(()),
        };

        let channel_id = Uuid::new_v4().to_string();
        let (write, read) = ws_stream.split();
        let result = self.run_session(write, read, &channel_id).await;
        self.teardown(&channel_id, &result).await;
        result
    }

    async fn run_session(
        &self,
        mut write: WsSink,
        mut read: WsSource,
        channel_id: &str,
    ) -> WsResult<()> {
        let stale = self.discard_stale_outbound().await;
        if stale > 0 {
            warn!(stale, "Discarded frames queued for a previous session");
        }

        *self.channel_id.write() = Some(channel_id.to_string());
        *self.state.write() = ConnectionState::Connected;
        *self.reconnect_count.write() = 0;
        self.health.reset();
        info!(channel_id, identity = %self.identity, "WebSocket connected");

        if let Some(frame) = self.subscriptions.on_connected() {
            write.send(Message::Text(frame)).await?;
        }

        self.emit(ChannelEvent::Connected {
            channel_id: channel_id.to_string(),
            identity: self.identity.clone(),
        })
        .await;

        let mut health_check = tokio::time::interval(self.health.check_interval());
        health_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let outbound_recv = async { self.outbound_rx.lock().await.recv().await };

            tokio::select! {
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in message loop");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(?e, "Failed to send Close frame during shutdown");
                    }
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text_message(&text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.health.record_message();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.health.record_pong();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(code, %reason, "WebSocket closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            error!(?e, "WebSocket read error");
                            return Err(e.into());
                        }
                        None => {
                            warn!("WebSocket stream ended");
                            return Err(WsError::ConnectionClosed {
                                code: 1006,
                                reason: "Stream ended".to_string(),
                            });
                        }
                        _ => {}
                    }
                }

                outbound = outbound_recv => {
                    match outbound {
                        Some(WsOutbound::Text(text)) => {
                            write.send(Message::Text(text)).await?;
                        }
                        Some(WsOutbound::Command { correlation_key, payload }) => {
                            write.send(Message::Text(payload)).await?;
                            debug!(%correlation_key, "Command sent to WebSocket");
                        }
                        None => {
                            return Err(WsError::SendFailed("outbound queue closed".to_string()));
                        }
                    }
                }

                _ = health_check.tick() => {
                    if self.health.is_timed_out() {
                        error!("Heartbeat timeout, forcing reconnect");
                        self.health.mark_degraded();
                        return Err(WsError::HeartbeatTimeout);
                    }

                    if self.health.should_send_heartbeat() {
                        self.health.ping().await;
                    }
                }
            }
        }
    }

    async fn handle_text_message(&self, text: &str) {
        self.health.record_message();

        let msg = match InboundMessage::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(%e, "Dropping unparseable frame");
                return;
            }
        };

        match &msg {
            InboundMessage::Pong => {
                debug!("Received application-level pong");
                self.health.record_pong();
                return;
            }
            InboundMessage::Error(message) => {
                warn!(%message, "Received error event");
                return;
            }
            InboundMessage::Unknown { event } => {
                debug!(%event, "Ignoring unhandled event");
                return;
            }
            InboundMessage::OrderUpdate(_) | InboundMessage::OrderCancelled(_) => {}
        }

        self.emit(ChannelEvent::Message(msg)).await;
    }

    /// Runs on every session exit path. Room membership is reset before the
    /// state leaves `Connected`.
    async fn teardown(&self, channel_id: &str, result: &WsResult<()>) {
        self.subscriptions.on_disconnected();
        self.health.on_disconnected();
        *self.channel_id.write() = None;
        *self.state.write() = if self.shutdown_token.is_cancelled() {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Reconnecting
        };

        let reason = match result {
            Ok(()) => "closed".to_string(),
            Err(e) => e.to_string(),
        };
        info!(channel_id, %reason, "WebSocket session ended");

        self.emit(ChannelEvent::Disconnected {
            channel_id: channel_id.to_string(),
            reason,
        })
        .await;
    }

    async fn discard_stale_outbound(&self) -> usize {
        let mut rx = self.outbound_rx.lock().await;
        let mut discarded = 0;
        while rx.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }

    async fn emit(&self, event: ChannelEvent) {
        if self.event_tx.send(event).await.is_err() {
            warn!("Channel event receiver dropped");
        }
    }
}

/// Backoff delay for the given attempt: `base * 2^(attempt-1)`, capped, plus jitter.
pub fn backoff_delay(config: &ConnectionConfig, attempt: u32) -> Duration {
    let base = config.reconnect_base_delay_ms;
    let max = config.reconnect_max_delay_ms;

    // attempt=1 -> base, attempt=2 -> 2*base, attempt=3 -> 4*base
    let exponent = attempt.saturating_sub(1).min(10);
    let delay = base.saturating_mul(1u64 << exponent).min(max);

    Duration::from_millis(delay + rand_jitter(config.reconnect_jitter_ms))
}

/// Generate random jitter in `0..max_ms`.
fn rand_jitter(max_ms: u64) -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    if max_ms == 0 {
        return 0;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    u64::from(nanos) % max_ms
}
