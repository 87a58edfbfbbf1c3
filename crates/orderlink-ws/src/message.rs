//! Channel wire messages.
//!
//! Every frame is a JSON text frame of the form `{"event": <name>, "data": <payload>}`.

use crate::error::{WsError, WsResult};
use orderlink_core::{CancellationAck, Identity, OrderId, OrderStatusEvent};
use serde::{Deserialize, Serialize};

/// Wire event names.
pub mod events {
    pub const JOIN_ROOM: &str = "join-room";
    pub const LEAVE_ROOM: &str = "leave-room";
    pub const ORDER_UPDATE: &str = "order-update";
    pub const CANCEL_ORDER: &str = "cancel-order";
    pub const ORDER_CANCELLED: &str = "order-cancelled";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const ERROR: &str = "error";
}

// ============================================================================
// Outbound
// ============================================================================

/// Payload of `cancel-order`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderPayload {
    pub order_id: OrderId,
    pub reason: String,
}

/// Payload of `ping`: always `{}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyPayload {}

/// Client-to-server message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundMessage {
    JoinRoom(Identity),
    LeaveRoom(Identity),
    CancelOrder(CancelOrderPayload),
    Ping(EmptyPayload),
}

impl OutboundMessage {
    pub fn join_room(identity: &Identity) -> Self {
        Self::JoinRoom(identity.clone())
    }

    pub fn leave_room(identity: &Identity) -> Self {
        Self::LeaveRoom(identity.clone())
    }

    pub fn cancel_order(order_id: &OrderId, reason: impl Into<String>) -> Self {
        Self::CancelOrder(CancelOrderPayload {
            order_id: order_id.clone(),
            reason: reason.into(),
        })
    }

    pub fn ping() -> Self {
        Self::Ping(EmptyPayload {})
    }

    /// Wire event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::JoinRoom(_) => events::JOIN_ROOM,
            Self::LeaveRoom(_) => events::LEAVE_ROOM,
            Self::CancelOrder(_) => events::CANCEL_ORDER,
            Self::Ping(_) => events::PING,
        }
    }

    /// Correlation key for commands that expect an ack.
    pub fn correlation_key(&self) -> Option<&OrderId> {
        match self {
            Self::CancelOrder(payload) => Some(&payload.order_id),
            _ => None,
        }
    }

    /// Encode as a text frame.
    pub fn to_frame(&self) -> WsResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Envelope shared by every inbound frame.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFrame {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Server-to-client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    OrderUpdate(OrderStatusEvent),
    OrderCancelled(CancellationAck),
    Pong,
    Error(String),
    /// Event this client does not handle.
    Unknown { event: String },
}

impl InboundMessage {
    /// Parse a text frame.
    pub fn parse(text: &str) -> WsResult<Self> {
        let frame: RawFrame = serde_json::from_str(text)?;
        Self::from_frame(frame)
    }

    fn from_frame(frame: RawFrame) -> WsResult<Self> {
        let msg = match frame.event.as_str() {
            events::ORDER_UPDATE => Self::OrderUpdate(
                serde_json::from_value(frame.data)
                    .map_err(|e| WsError::ParseError(format!("order-update: {e}")))?,
            ),
            events::ORDER_CANCELLED => Self::OrderCancelled(
                serde_json::from_value(frame.data)
                    .map_err(|e| WsError::ParseError(format!("order-cancelled: {e}")))?,
            ),
            events::PONG => Self::Pong,
            events::ERROR => Self::Error(error_text(&frame.data)),
            _ => Self::Unknown { event: frame.event },
        };
        Ok(msg)
    }

    /// Wire event name.
    pub fn event_name(&self) -> &str {
        match self {
            Self::OrderUpdate(_) => events::ORDER_UPDATE,
            Self::OrderCancelled(_) => events::ORDER_CANCELLED,
            Self::Pong => events::PONG,
            Self::Error(_) => events::ERROR,
            Self::Unknown { event } => event,
        }
    }
}

/// Error payloads arrive either as a bare string or as `{"message": ...}`.
fn error_text(data: &serde_json::Value) -> String {
    match data {
        serde_json::Value::String(s) => s.clone(),
        other => other
            .get("message")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderlink_core::OrderStatus;
    use serde_json::json;

    #[test]
    fn test_join_room_frame() {
        let identity = Identity::buyer("B1").unwrap();
        let frame = OutboundMessage::join_room(&identity).to_frame().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!({"event": "join-room", "data": {"role": "buyer", "id": "B1"}})
        );
    }

    #[test]
    fn test_cancel_order_frame() {
        let msg = OutboundMessage::cancel_order(&OrderId::from("O1"), "changed my mind");
        assert_eq!(msg.correlation_key().map(OrderId::as_str), Some("O1"));

        let value: serde_json::Value = serde_json::from_str(&msg.to_frame().unwrap()).unwrap();
        assert_eq!(value["event"], "cancel-order");
        assert_eq!(value["data"]["orderId"], "O1");
        assert_eq!(value["data"]["reason"], "changed my mind");
    }

    #[test]
    fn test_ping_frame_has_empty_payload() {
        let value: serde_json::Value =
            serde_json::from_str(&OutboundMessage::ping().to_frame().unwrap()).unwrap();
        assert_eq!(value, json!({"event": "ping", "data": {}}));
    }

    #[test]
    fn test_parse_order_update() {
        let raw = r#"{"event":"order-update","data":{"orderId":"O1","orderNumber":"ORD-1","status":"processing","timestamp":100}}"#;
        match InboundMessage::parse(raw).unwrap() {
            InboundMessage::OrderUpdate(event) => {
                assert_eq!(event.order_id.as_str(), "O1");
                assert_eq!(event.status, OrderStatus::Processing);
                assert_eq!(event.timestamp, 100);
            }
            other => panic!("expected OrderUpdate, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_order_cancelled() {
        let raw = r#"{"event":"order-cancelled","data":{"orderId":"O1","orderNumber":"ORD-1"}}"#;
        let msg = InboundMessage::parse(raw).unwrap();
        assert!(matches!(msg, InboundMessage::OrderCancelled(ref ack) if ack.order_id.as_str() == "O1"));
    }

    #[test]
    fn test_parse_pong_without_data() {
        assert_eq!(InboundMessage::parse(r#"{"event":"pong"}"#).unwrap(), InboundMessage::Pong);
    }

    #[test]
    fn test_parse_error_variants() {
        let bare = InboundMessage::parse(r#"{"event":"error","data":"room not found"}"#).unwrap();
        assert_eq!(bare, InboundMessage::Error("room not found".to_string()));

        let object =
            InboundMessage::parse(r#"{"event":"error","data":{"message":"bad payload"}}"#).unwrap();
        assert_eq!(object, InboundMessage::Error("bad payload".to_string()));
    }

    #[test]
    fn test_parse_unknown_event() {
        let msg = InboundMessage::parse(r#"{"event":"new-review","data":{}}"#).unwrap();
        assert_eq!(msg.event_name(), "new-review");
    }

    #[test]
    fn test_parse_malformed_order_update() {
        let raw = r#"{"event":"order-update","data":{"orderId":"O1","status":"lost","timestamp":1}}"#;
        assert!(matches!(InboundMessage::parse(raw), Err(WsError::ParseError(_))));
    }
}
