//! Command transport abstraction.
//!
//! The correlator talks to the channel only through `CommandSender`, so it
//! can be driven by a recording mock in tests and by the live write handle
//! in production.

use orderlink_ws::{OutboundMessage, SendError, WsWriteHandle};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Sends command frames on the live channel session.
pub trait CommandSender: Send + Sync {
    /// Queue a frame. Resolves once queued; the ack arrives separately.
    fn send(&self, msg: OutboundMessage) -> BoxFuture<'_, Result<(), SendError>>;

    /// A session is live and accepting frames.
    fn is_connected(&self) -> bool;
}

/// Arc wrapper for `CommandSender` trait objects.
pub type DynCommandSender = Arc<dyn CommandSender>;

impl CommandSender for WsWriteHandle {
    fn send(&self, msg: OutboundMessage) -> BoxFuture<'_, Result<(), SendError>> {
        Box::pin(async move { WsWriteHandle::send(self, &msg).await })
    }

    fn is_connected(&self) -> bool {
        WsWriteHandle::is_connected(self)
    }
}

/// Recording sender for tests.
#[derive(Debug)]
pub struct MockCommandSender {
    sends: Mutex<Vec<OutboundMessage>>,
    next_result: Mutex<Result<(), SendError>>,
    connected: AtomicBool,
}

impl Default for MockCommandSender {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCommandSender {
    pub fn new() -> Self {
        Self {
            sends: Mutex::new(Vec::new()),
            next_result: Mutex::new(Ok(())),
            connected: AtomicBool::new(true),
        }
    }

    pub fn set_next_result(&self, result: Result<(), SendError>) {
        *self.next_result.lock() = result;
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Recorded frames, oldest first.
    pub fn get_sends(&self) -> Vec<OutboundMessage> {
        self.sends.lock().clone()
    }

    pub fn send_count(&self) -> usize {
        self.sends.lock().len()
    }
}

impl CommandSender for MockCommandSender {
    fn send(&self, msg: OutboundMessage) -> BoxFuture<'_, Result<(), SendError>> {
        Box::pin(async move {
            let result = self.next_result.lock().clone();
            if result.is_ok() {
                self.sends.lock().push(msg);
            }
            result
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
