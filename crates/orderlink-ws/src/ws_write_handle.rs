//! WebSocket write handle for sending messages.
//!
//! Provides a fire-and-forget sending API. Ack correlation is handled by
//! the command correlator in the sync crate.

use crate::connection::ConnectionState;
use crate::message::OutboundMessage;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Outbound frame to be sent via WebSocket.
#[derive(Debug)]
pub enum WsOutbound {
    /// Control frame (join/leave room, ping).
    Text(String),
    /// Command frame awaiting an asynchronous ack.
    Command {
        /// Correlation key the ack will carry.
        correlation_key: String,
        /// JSON payload to send.
        payload: String,
    },
}

/// Error type for send operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// No live session.
    NotConnected,
    /// Channel closed (connection manager dropped).
    ChannelClosed,
    /// Message could not be encoded.
    Encode(String),
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::ChannelClosed => write!(f, "channel closed"),
            Self::Encode(e) => write!(f, "encode failed: {e}"),
        }
    }
}

impl std::error::Error for SendError {}

/// Write handle for sending messages to WebSocket.
///
/// Frames are queued on a channel drained by the session loop, so the
/// handle stays valid across reconnects. Frames are only accepted while
/// the connection is `Connected`; anything still queued when a session
/// ends is discarded at the start of the next one.
#[derive(Clone)]
pub struct WsWriteHandle {
    tx: mpsc::Sender<WsOutbound>,
    state: Arc<RwLock<ConnectionState>>,
}

impl WsWriteHandle {
    /// Create a new write handle.
    pub fn new(tx: mpsc::Sender<WsOutbound>, state: Arc<RwLock<ConnectionState>>) -> Self {
        Self { tx, state }
    }

    /// Queue a typed message.
    ///
    /// # Errors
    ///
    /// - `SendError::NotConnected`: connection is not `Connected`
    /// - `SendError::ChannelClosed`: session loop is gone
    /// - `SendError::Encode`: serialization failed
    pub async fn send(&self, msg: &OutboundMessage) -> Result<(), SendError> {
        if !self.is_connected() {
            return Err(SendError::NotConnected);
        }

        let payload = msg.to_frame().map_err(|e| SendError::Encode(e.to_string()))?;
        let outbound = match msg.correlation_key() {
            Some(key) => WsOutbound::Command {
                correlation_key: key.to_string(),
                payload,
            },
            None => WsOutbound::Text(payload),
        };

        self.tx
            .send(outbound)
            .await
            .map_err(|_| SendError::ChannelClosed)?;

        debug!(event = msg.event_name(), "Frame queued for sending");
        Ok(())
    }

    /// Returns true if the connection is `Connected` and the channel is open.
    pub fn is_connected(&self) -> bool {
        let state = *self.state.read();
        state == ConnectionState::Connected && !self.tx.is_closed()
    }

    /// Get current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderlink_core::OrderId;

    fn create_test_handle(state: ConnectionState) -> (WsWriteHandle, mpsc::Receiver<WsOutbound>) {
        let (tx, rx) = mpsc::channel(100);
        let handle = WsWriteHandle::new(tx, Arc::new(RwLock::new(state)));
        (handle, rx)
    }

    #[tokio::test]
    async fn test_send_command_carries_correlation_key() {
        let (handle, mut rx) = create_test_handle(ConnectionState::Connected);

        let msg = OutboundMessage::cancel_order(&OrderId::from("O1"), "wrong size");
        handle.send(&msg).await.unwrap();

        match rx.recv().await.unwrap() {
            WsOutbound::Command {
                correlation_key,
                payload,
            } => {
                assert_eq!(correlation_key, "O1");
                assert!(payload.contains("cancel-order"));
            }
            other => panic!("expected Command, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_ping_is_text() {
        let (handle, mut rx) = create_test_handle(ConnectionState::Connected);
        handle.send(&OutboundMessage::ping()).await.unwrap();
        assert!(matches!(rx.recv().await.unwrap(), WsOutbound::Text(_)));
    }

    #[tokio::test]
    async fn test_send_refused_while_reconnecting() {
        let (handle, mut rx) = create_test_handle(ConnectionState::Reconnecting);

        let result = handle.send(&OutboundMessage::ping()).await;
        assert_eq!(result, Err(SendError::NotConnected));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let (handle, rx) = create_test_handle(ConnectionState::Connected);
        drop(rx);

        assert!(!handle.is_connected());
        let result = handle.send(&OutboundMessage::ping()).await;
        assert_eq!(result, Err(SendError::NotConnected));
    }
}
