//! Persistent order-notification channel.
//!
//! Provides WebSocket connectivity for the order sync client with:
//! - Identity-bound sessions with automatic reconnection and exponential backoff
//! - Notification room joins replayed after every reconnect
//! - Liveness probing (ping/pong) with a pollable health snapshot
//! - A single ordered stream of connection signals and inbound messages

pub mod connection;
pub mod error;
pub mod health;
pub mod message;
pub mod subscription;
pub mod ws_write_handle;

pub use connection::{
    backoff_delay, ChannelEvent, ConnectionConfig, ConnectionHandle, ConnectionManager,
    ConnectionState, ConnectionStatus,
};
pub use error::{WsError, WsResult};
pub use health::{ConnectionHealth, HealthMonitor};
pub use message::{CancelOrderPayload, InboundMessage, OutboundMessage};
pub use subscription::{ActiveRoom, JoinOutcome, SubscriptionRegistry};
pub use ws_write_handle::{SendError, WsOutbound, WsWriteHandle};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
