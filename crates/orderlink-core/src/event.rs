//! Transient inbound events.
//!
//! Events are applied to the order store and then dropped; nothing here is
//! retained beyond a single dispatch.

use crate::order::{Cancellation, OrderId, OrderStatus, TimestampMs};
use serde::{Deserialize, Serialize};

/// Server push for an order status change (`order-update`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusEvent {
    pub order_id: OrderId,
    #[serde(default)]
    pub order_number: Option<String>,
    pub status: OrderStatus,
    pub timestamp: TimestampMs,
}

/// Acknowledgment of a `cancel-order` command (`order-cancelled`).
///
/// Only `orderId` and `orderNumber` are guaranteed; the cancellation
/// metadata is filled in from the pending command when the server omits it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationAck {
    pub order_id: OrderId,
    #[serde(default)]
    pub order_number: Option<String>,
    #[serde(default)]
    pub cancelled_by: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub timestamp: Option<TimestampMs>,
}

impl CancellationAck {
    /// Resolve the cancellation metadata, preferring what the server sent.
    pub fn cancellation(
        &self,
        default_by: &str,
        default_reason: &str,
        fallback_at: TimestampMs,
    ) -> Cancellation {
        Cancellation {
            by: self
                .cancelled_by
                .clone()
                .unwrap_or_else(|| default_by.to_string()),
            reason: self
                .reason
                .clone()
                .unwrap_or_else(|| default_reason.to_string()),
            at: self.timestamp.unwrap_or(fallback_at),
        }
    }
}
