//! Order record types.
//!
//! `Order` is the cached projection owned by the order store. UI code only
//! ever sees clones of it.

use crate::error::CoreError;
use crate::event::OrderStatusEvent;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unix timestamp in milliseconds.
pub type TimestampMs = u64;

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> TimestampMs {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Server-assigned order identifier. Used as the command correlation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for OrderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// No further transitions are expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// Buyers may only cancel before shipment.
    pub fn can_cancel(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Processing => "Processing",
            Self::Shipped => "Shipped",
            Self::Delivered => "Delivered",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            // Both spellings show up on the wire.
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(CoreError::InvalidStatus(other.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for OrderStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Line item of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    #[serde(default)]
    pub name: String,
    pub quantity: u32,
    pub price: Decimal,
}

/// Cancellation metadata carried by a confirmed cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    /// Who cancelled (role or user id, as reported by the server).
    pub by: String,
    pub reason: String,
    pub at: TimestampMs,
}

/// Cached order record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: OrderId,
    pub order_number: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub total_price: Decimal,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    pub last_updated: TimestampMs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation: Option<Cancellation>,
}

impl Order {
    /// Build a bare record from a status push for an order not yet cached.
    ///
    /// Price and items stay empty until the next reconciliation fills them in.
    pub fn from_event(event: &OrderStatusEvent) -> Self {
        Self {
            order_id: event.order_id.clone(),
            order_number: event.order_number.clone().unwrap_or_default(),
            status: event.status,
            total_price: Decimal::ZERO,
            items: Vec::new(),
            last_updated: event.timestamp,
            cancellation: None,
        }
    }

    /// Whether `timestamp` is strictly newer than this record.
    pub fn is_older_than(&self, timestamp: TimestampMs) -> bool {
        self.last_updated < timestamp
    }
}
