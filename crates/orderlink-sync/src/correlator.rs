//! Request/ack correlation for cancellation commands.
//!
//! Each in-flight command holds a slot in the pending map keyed by order id.
//! The ack path and the deadline path both race to remove that slot; whoever
//! removes it decides the outcome, so every command resolves exactly once.

use crate::error::{SyncError, SyncResult};
use crate::sender::DynCommandSender;
use crate::store::{ApplyOutcome, OrderStateStore};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use orderlink_core::{
    now_ms, Cancellation, CancellationAck, CommandKind, CommandOutcome, OrderId, RejectReason,
    TimestampMs,
};
use orderlink_telemetry::Metrics;
use orderlink_ws::{OutboundMessage, SendError};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Default ack deadline.
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 10_000;

/// A command awaiting its ack.
struct PendingCommand {
    /// Distinguishes successive commands for the same order.
    seq: u64,
    kind: CommandKind,
    reason: String,
    sent_at: TimestampMs,
    tx: Option<oneshot::Sender<CommandOutcome>>,
}

impl std::fmt::Debug for PendingCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCommand")
            .field("seq", &self.seq)
            .field("kind", &self.kind)
            .field("sent_at", &self.sent_at)
            .field("has_tx", &self.tx.is_some())
            .finish()
    }
}

/// Maps an outcome onto the sync error taxonomy.
pub trait CommandOutcomeExt {
    /// `Ok` with the confirmed cancellation, or the matching `SyncError`.
    fn into_result(self) -> SyncResult<Cancellation>;
}

impl CommandOutcomeExt for CommandOutcome {
    fn into_result(self) -> SyncResult<Cancellation> {
        match self {
            CommandOutcome::Acked { cancellation, .. } => Ok(cancellation),
            CommandOutcome::TimedOut { order_id } => Err(SyncError::CommandTimeout { order_id }),
            CommandOutcome::Rejected { order_id, reason } => Err(match reason {
                RejectReason::AlreadyPending => SyncError::DuplicateCommand { order_id },
                RejectReason::NotConnected => SyncError::NotConnected,
                RejectReason::NotCancellable { status } => {
                    SyncError::NotCancellable { order_id, status }
                }
            }),
        }
    }
}

/// What an ack did.
#[derive(Debug, Clone, PartialEq)]
pub struct AckResolution {
    /// Effect on the order store.
    pub applied: ApplyOutcome,
    /// Outcome handed to the waiting caller, if a command was pending.
    pub outcome: Option<CommandOutcome>,
}

/// Command correlator.
pub struct CommandCorrelator {
    pending: DashMap<OrderId, PendingCommand>,
    next_seq: AtomicU64,
    timeout: Duration,
    sender: DynCommandSender,
    store: Arc<OrderStateStore>,
    /// Attributed to acks that do not say who cancelled.
    cancelled_by: RwLock<String>,
}

impl CommandCorrelator {
    pub fn new(
        sender: DynCommandSender,
        store: Arc<OrderStateStore>,
        timeout_ms: u64,
        cancelled_by: impl Into<String>,
    ) -> Self {
        Self {
            pending: DashMap::new(),
            next_seq: AtomicU64::new(1),
            timeout: Duration::from_millis(timeout_ms),
            sender,
            store,
            cancelled_by: RwLock::new(cancelled_by.into()),
        }
    }

    /// Attribute unattributed acks to `by` (the bound identity's role).
    pub fn set_cancelled_by(&self, by: impl Into<String>) {
        *self.cancelled_by.write() = by.into();
    }

    /// Request cancellation and wait for the outcome.
    ///
    /// Resolves within the configured deadline. `TimedOut` means the server
    /// may or may not have cancelled the order; the cache is left untouched.
    pub async fn cancel_order(&self, order_id: &OrderId, reason: &str) -> CommandOutcome {
        let outcome = self.run_cancel(order_id, reason).await;
        Metrics::command_outcome(outcome.label());
        Metrics::commands_inflight_set(self.pending.len() as i64);
        info!(order_id = %order_id, outcome = outcome.label(), "Cancel command resolved");
        outcome
    }

    async fn run_cancel(&self, order_id: &OrderId, reason: &str) -> CommandOutcome {
        if let Some(order) = self.store.get(order_id) {
            if !order.status.can_cancel() {
                return CommandOutcome::Rejected {
                    order_id: order_id.clone(),
                    reason: RejectReason::NotCancellable {
                        status: order.status.to_string(),
                    },
                };
            }
        }

        let (seq, mut rx) = match self.register(order_id, reason) {
            Some(registered) => registered,
            None => {
                debug!(order_id = %order_id, "Cancel already in flight, rejecting duplicate");
                return CommandOutcome::Rejected {
                    order_id: order_id.clone(),
                    reason: RejectReason::AlreadyPending,
                };
            }
        };

        if !self.sender.is_connected() {
            self.remove_if_current(order_id, seq);
            return CommandOutcome::Rejected {
                order_id: order_id.clone(),
                reason: RejectReason::NotConnected,
            };
        }

        Metrics::commands_inflight_set(self.pending.len() as i64);
        let msg = OutboundMessage::cancel_order(order_id, reason);
        if let Err(e) = self.sender.send(msg).await {
            warn!(order_id = %order_id, %e, "Failed to send cancel-order");
            if self.remove_if_current(order_id, seq) {
                return CommandOutcome::Rejected {
                    order_id: order_id.clone(),
                    reason: match e {
                        SendError::NotConnected | SendError::ChannelClosed => {
                            RejectReason::NotConnected
                        }
                        // Encoding a cancel frame cannot fail for valid ids.
                        SendError::Encode(_) => RejectReason::NotConnected,
                    },
                };
            }
            // Resolved concurrently (session dropped); take that outcome.
        }

        match tokio::time::timeout(self.timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => CommandOutcome::TimedOut {
                order_id: order_id.clone(),
            },
            Err(_) => {
                if self.remove_if_current(order_id, seq) {
                    warn!(
                        order_id = %order_id,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Cancel unconfirmed: no ack before deadline"
                    );
                    CommandOutcome::TimedOut {
                        order_id: order_id.clone(),
                    }
                } else {
                    // The ack path won the removal race; its outcome is already in the channel.
                    rx.try_recv().unwrap_or(CommandOutcome::TimedOut {
                        order_id: order_id.clone(),
                    })
                }
            }
        }
    }

    fn register(
        &self,
        order_id: &OrderId,
        reason: &str,
    ) -> Option<(u64, oneshot::Receiver<CommandOutcome>)> {
        match self.pending.entry(order_id.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
                let (tx, rx) = oneshot::channel();
                slot.insert(PendingCommand {
                    seq,
                    kind: CommandKind::Cancel,
                    reason: reason.to_string(),
                    sent_at: now_ms(),
                    tx: Some(tx),
                });
                Some((seq, rx))
            }
        }
    }

    fn remove_if_current(&self, order_id: &OrderId, seq: u64) -> bool {
        self.pending
            .remove_if(order_id, |_, pending| pending.seq == seq)
            .is_some()
    }

    /// Handle an `order-cancelled` ack.
    ///
    /// The ack is applied to the store whether or not a command was waiting
    /// for it.
    pub fn resolve_ack(&self, ack: &CancellationAck) -> AckResolution {
        let pending = self.pending.remove(&ack.order_id).map(|(_, p)| p);
        let fallback_at = now_ms().max(self.store.last_updated(&ack.order_id).unwrap_or(0));

        let default_by = self.cancelled_by.read().clone();
        let cancellation = match &pending {
            Some(p) => ack.cancellation(&default_by, &p.reason, fallback_at),
            None => ack.cancellation(&default_by, "", fallback_at),
        };

        let applied = self.store.apply_cancellation_ack(
            &ack.order_id,
            ack.order_number.as_deref(),
            cancellation.clone(),
        );
        debug!(order_id = %ack.order_id, result = applied.label(), "Cancellation ack applied");

        let Some(mut pending) = pending else {
            info!(order_id = %ack.order_id, "Ack with no pending command");
            return AckResolution {
                applied,
                outcome: None,
            };
        };

        let outcome = CommandOutcome::Acked {
            order_id: ack.order_id.clone(),
            cancellation,
        };
        debug!(
            order_id = %ack.order_id,
            latency_ms = now_ms().saturating_sub(pending.sent_at),
            "Cancel acknowledged"
        );
        if let Some(tx) = pending.tx.take() {
            let _ = tx.send(outcome.clone());
        }
        AckResolution {
            applied,
            outcome: Some(outcome),
        }
    }

    /// Resolve every in-flight command as `TimedOut` (session lost).
    ///
    /// Returns the affected order ids.
    pub fn fail_all_pending(&self) -> Vec<OrderId> {
        let keys: Vec<OrderId> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut failed = Vec::with_capacity(keys.len());

        for order_id in keys {
            if let Some((_, mut pending)) = self.pending.remove(&order_id) {
                if let Some(tx) = pending.tx.take() {
                    let _ = tx.send(CommandOutcome::TimedOut {
                        order_id: order_id.clone(),
                    });
                }
                failed.push(order_id);
            }
        }

        if !failed.is_empty() {
            warn!(count = failed.len(), "Session lost with commands in flight, marked unconfirmed");
        }
        Metrics::commands_inflight_set(self.pending.len() as i64);
        failed
    }

    /// A command for this order is in flight.
    pub fn is_pending(&self, order_id: &OrderId) -> bool {
        self.pending.contains_key(order_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
