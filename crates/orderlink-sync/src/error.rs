//! Sync error types.
//!
//! Nothing here is fatal to the host application: every variant degrades to
//! operating on cached data until the next reconciliation.

use orderlink_core::{OrderId, TimestampMs};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Channel unreachable or rejected; the connection manager keeps retrying.
    #[error("Connection error: {0}")]
    Connection(#[from] orderlink_ws::WsError),

    /// No ack before the deadline. The cancellation is unconfirmed, not failed.
    #[error("Cancellation of {order_id} unconfirmed")]
    CommandTimeout { order_id: OrderId },

    /// Refused client-side; never sent over the wire.
    #[error("A command for {order_id} is already pending")]
    DuplicateCommand { order_id: OrderId },

    #[error("Not connected")]
    NotConnected,

    #[error("Order {order_id} cannot be cancelled in status {status}")]
    NotCancellable { order_id: OrderId, status: String },

    /// Dropped by the freshness check; diagnostics only.
    #[error("Stale event for {order_id} ignored (event {event_ts} <= cached {cached_ts})")]
    StaleEventIgnored {
        order_id: OrderId,
        event_ts: TimestampMs,
        cached_ts: TimestampMs,
    },

    /// Order source (REST) failure. Retryable failures are retried within
    /// the same reconciliation run.
    #[error("Fetch failed: {message}")]
    Fetch { message: String, retryable: bool },
}

impl SyncError {
    pub fn fetch(message: impl Into<String>) -> Self {
        Self::Fetch {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch { retryable: true, .. })
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
