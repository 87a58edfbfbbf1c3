//! Order sync client: the explicit connection context.
//!
//! Owns one connection manager, order store, dispatcher, correlator and
//! reconciler, and a single dispatch loop consuming the channel's event
//! stream. Everything the application needs goes through this type.

use crate::correlator::{CommandCorrelator, DEFAULT_COMMAND_TIMEOUT_MS};
use crate::dispatcher::EventDispatcher;
use crate::error::{SyncError, SyncResult};
use crate::reconcile::{OrderSource, Reconciler, DEFAULT_MAX_PAGES, DEFAULT_PAGE_SIZE};
use crate::store::{OrderChange, OrderStateStore, OrderSubscription, ReplaceSummary};
use orderlink_core::{CommandOutcome, Identity, Order, OrderDraft, OrderId};
use orderlink_telemetry::Metrics;
use orderlink_ws::{
    ChannelEvent, ConnectionConfig, ConnectionHandle, ConnectionHealth, ConnectionManager,
    ConnectionState, ConnectionStatus,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub connection: ConnectionConfig,
    /// Ack deadline for cancel commands.
    pub command_timeout_ms: u64,
    pub reconcile_page_size: u32,
    pub reconcile_max_pages: u32,
    /// Capacity of the channel event queue.
    pub event_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            reconcile_page_size: DEFAULT_PAGE_SIZE,
            reconcile_max_pages: DEFAULT_MAX_PAGES,
            event_buffer: 1000,
        }
    }
}

/// Identity the client was last bound to, shared with the dispatch loop.
#[derive(Debug, Default)]
struct Binding {
    /// Kept across `disconnect` so the next `connect` can detect a switch.
    identity: Option<Identity>,
    /// True between `Connected` for the bound identity and the next
    /// `Disconnected`. Messages outside that window belong to an old session.
    live: bool,
}

/// Real-time order status client.
pub struct OrderSyncClient {
    manager: Arc<ConnectionManager>,
    store: Arc<OrderStateStore>,
    dispatcher: Arc<EventDispatcher>,
    correlator: Arc<CommandCorrelator>,
    reconciler: Arc<Reconciler>,
    binding: Arc<Mutex<Binding>>,
    shutdown: CancellationToken,
}

impl OrderSyncClient {
    /// Build the client and start its dispatch loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: SyncConfig, source: Arc<dyn OrderSource>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let manager = Arc::new(ConnectionManager::new(config.connection.clone(), event_tx));
        let store = Arc::new(OrderStateStore::new());
        let correlator = Arc::new(CommandCorrelator::new(
            Arc::new(manager.write_handle()),
            store.clone(),
            config.command_timeout_ms,
            "buyer",
        ));
        let dispatcher = Arc::new(EventDispatcher::new(store.clone(), correlator.clone()));
        let reconciler = Arc::new(Reconciler::new(
            source,
            store.clone(),
            config.reconcile_page_size,
            config.reconcile_max_pages,
        ));
        let binding = Arc::new(Mutex::new(Binding::default()));
        let shutdown = CancellationToken::new();

        let event_loop = EventLoop {
            manager: manager.clone(),
            dispatcher: dispatcher.clone(),
            correlator: correlator.clone(),
            reconciler: reconciler.clone(),
            binding: binding.clone(),
            shutdown: shutdown.clone(),
        };
        tokio::spawn(event_loop.run(event_rx));

        Self {
            manager,
            store,
            dispatcher,
            correlator,
            reconciler,
            binding,
            shutdown,
        }
    }

    /// Bind the channel to `identity` and join its notification room.
    ///
    /// Switching identity drops the previous identity's cached orders, also
    /// after an explicit `disconnect`.
    pub async fn connect(&self, identity: Identity) -> SyncResult<ConnectionHandle> {
        let switched = {
            let mut binding = self.binding.lock();
            let previous = binding.identity.replace(identity.clone());
            match previous {
                Some(previous) if previous != identity => {
                    binding.live = false;
                    info!(
                        from = %previous,
                        to = %identity,
                        "Identity switched, dropping cached orders"
                    );
                    true
                }
                _ => false,
            }
        };
        if switched {
            self.store.clear();
        }

        let handle = self.manager.connect(identity.clone()).await?;
        self.correlator.set_cancelled_by(identity.role.as_str());
        let outcome = self.manager.subscriptions().join_room(&identity).await;
        debug!(%identity, ?outcome, "Room join requested");
        Ok(handle)
    }

    /// Close the channel. In-flight commands resolve as unconfirmed.
    pub async fn disconnect(&self) {
        self.manager.disconnect().await;
        self.manager.subscriptions().clear_intent();
        self.correlator.fail_all_pending();
        Metrics::ws_disconnected();
        Metrics::ws_state_set(self.manager.state().as_str());
    }

    /// Cached orders, most recently updated first.
    pub fn order_snapshot(&self) -> Vec<Order> {
        self.store.snapshot()
    }

    pub fn order(&self, order_id: &OrderId) -> Option<Order> {
        self.store.get(order_id)
    }

    /// Observe cache changes.
    pub fn subscribe_to_orders<F>(&self, callback: F) -> OrderSubscription
    where
        F: Fn(&OrderChange) + Send + Sync + 'static,
    {
        self.store.subscribe(callback)
    }

    /// Request cancellation; resolves within the command deadline.
    pub async fn cancel_order(&self, order_id: &OrderId, reason: &str) -> CommandOutcome {
        self.correlator.cancel_order(order_id, reason).await
    }

    pub fn connection_health(&self) -> ConnectionHealth {
        self.manager.health().connection_health()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.manager.status()
    }

    /// Manual reconciliation. `Ok(None)` when a run was already in progress;
    /// that run picks the request up before it finishes.
    pub async fn refresh(&self) -> SyncResult<Option<ReplaceSummary>> {
        let identity = self.bound_identity()?;
        self.reconciler.reconcile(&identity).await
    }

    /// Resolve once no reconciliation is in progress.
    pub async fn wait_for_reconcile(&self) {
        self.reconciler.wait_idle().await;
    }

    /// Place an order and cache the created record.
    pub async fn place_order(&self, draft: OrderDraft) -> SyncResult<Order> {
        let identity = self.bound_identity()?;
        self.reconciler.place_order(&identity, draft).await
    }

    /// Handler registration.
    pub fn dispatcher(&self) -> Arc<EventDispatcher> {
        self.dispatcher.clone()
    }

    fn bound_identity(&self) -> SyncResult<Identity> {
        self.manager
            .status()
            .identity
            .ok_or(SyncError::NotConnected)
    }
}

impl Drop for OrderSyncClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// The single consumer of channel events; all store writes from the
/// channel are sequenced here.
struct EventLoop {
    manager: Arc<ConnectionManager>,
    dispatcher: Arc<EventDispatcher>,
    correlator: Arc<CommandCorrelator>,
    reconciler: Arc<Reconciler>,
    binding: Arc<Mutex<Binding>>,
    shutdown: CancellationToken,
}

impl EventLoop {
    async fn run(self, mut event_rx: mpsc::Receiver<ChannelEvent>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("Dispatch loop stopping");
                    break;
                }
                event = event_rx.recv() => {
                    let Some(event) = event else {
                        debug!("Channel event stream closed");
                        break;
                    };
                    self.handle(event);
                }
            }
        }
    }

    fn handle(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected {
                channel_id,
                identity,
            } => {
                {
                    let mut binding = self.binding.lock();
                    if binding.identity.as_ref() != Some(&identity) {
                        debug!(%channel_id, %identity, "Ignoring session of a previous identity");
                        return;
                    }
                    binding.live = true;
                }
                info!(%channel_id, %identity, "Channel connected, reconciling");
                Metrics::ws_connected();

                let reconciler = self.reconciler.clone();
                tokio::spawn(async move {
                    // Failures are logged by the reconciler; live events keep flowing.
                    let _ = reconciler.reconcile(&identity).await;
                });
            }
            ChannelEvent::Disconnected { channel_id, reason } => {
                self.binding.lock().live = false;
                let failed = self.correlator.fail_all_pending();
                let state = self.manager.state();
                if !failed.is_empty() {
                    warn!(
                        %channel_id,
                        count = failed.len(),
                        "Unconfirmed commands after session loss"
                    );
                }
                info!(%channel_id, %reason, %state, "Channel disconnected");
                Metrics::ws_disconnected();
                Metrics::ws_state_set(state.as_str());
                if state == ConnectionState::Reconnecting {
                    Metrics::ws_reconnect("session_lost");
                }
            }
            ChannelEvent::Message(msg) => {
                // Held through dispatch so `connect` cannot clear the store mid-write.
                let binding = self.binding.lock();
                if !binding.live {
                    debug!(?msg, "Dropping message from a closed session");
                    return;
                }
                self.dispatcher.dispatch(msg);
            }
        }
    }
}
