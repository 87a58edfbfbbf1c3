//! Liveness monitoring for the channel.
//!
//! Tracks ping/pong timing and inbound activity and exposes a pollable
//! health snapshot. A missing pong marks the connection degraded and the
//! session loop tears the transport down to force a reconnect.

use crate::message::OutboundMessage;
use crate::ws_write_handle::WsWriteHandle;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::time::Duration;
use tracing::{debug, warn};

/// Weight of the newest sample in the round-trip estimate.
const RTT_ALPHA: f64 = 0.2;

/// Pollable health snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionHealth {
    pub is_connected: bool,
    /// Last time the server was heard from (pong or any frame).
    pub last_seen: Option<DateTime<Utc>>,
    /// Smoothed ping round-trip time.
    pub round_trip_estimate: Option<Duration>,
    /// A pong was missed on the current or last session.
    pub degraded: bool,
}

/// Health monitor for the channel.
pub struct HealthMonitor {
    /// Idle time before a ping is sent.
    interval_ms: u64,
    /// How long to wait for pong.
    timeout_ms: u64,
    write: WsWriteHandle,
    /// Last ping sent time.
    last_ping: RwLock<Option<DateTime<Utc>>>,
    /// Last time anything arrived from the server.
    last_seen: RwLock<Option<DateTime<Utc>>>,
    /// Last frame received time, reset per session.
    last_message: RwLock<DateTime<Utc>>,
    waiting_for_pong: RwLock<bool>,
    rtt_estimate_ms: RwLock<Option<f64>>,
    degraded: RwLock<bool>,
}

impl HealthMonitor {
    /// Create a new health monitor.
    pub fn new(interval_ms: u64, timeout_ms: u64, write: WsWriteHandle) -> Self {
        Self {
            interval_ms,
            timeout_ms,
            write,
            last_ping: RwLock::new(None),
            last_seen: RwLock::new(None),
            last_message: RwLock::new(Utc::now()),
            waiting_for_pong: RwLock::new(false),
            rtt_estimate_ms: RwLock::new(None),
            degraded: RwLock::new(false),
        }
    }

    /// Reset per-session state (called on connection).
    pub fn reset(&self) {
        let now = Utc::now();
        *self.last_ping.write() = None;
        *self.last_message.write() = now;
        *self.last_seen.write() = Some(now);
        *self.waiting_for_pong.write() = false;
        *self.degraded.write() = false;
    }

    /// Session ended.
    pub fn on_disconnected(&self) {
        *self.waiting_for_pong.write() = false;
    }

    /// Send a liveness probe.
    ///
    /// Returns false without sending when not connected or when a ping is
    /// already outstanding.
    pub async fn ping(&self) -> bool {
        if !self.write.is_connected() {
            debug!("Not connected, ping skipped");
            return false;
        }
        if *self.waiting_for_pong.read() {
            return false;
        }

        match self.write.send(&OutboundMessage::ping()).await {
            Ok(()) => {
                self.record_ping();
                true
            }
            Err(e) => {
                warn!(%e, "Failed to queue ping");
                false
            }
        }
    }

    /// Record that a ping was sent.
    pub fn record_ping(&self) {
        let now = Utc::now();
        *self.last_ping.write() = Some(now);
        *self.waiting_for_pong.write() = true;
        debug!(time = %now, "Recorded ping");
    }

    /// Record that a pong was received.
    pub fn record_pong(&self) {
        let now = Utc::now();
        *self.last_seen.write() = Some(now);
        *self.waiting_for_pong.write() = false;

        if let Some(ping_time) = *self.last_ping.read() {
            let rtt_ms = (now - ping_time).num_milliseconds().max(0) as f64;
            let mut estimate = self.rtt_estimate_ms.write();
            *estimate = Some(match *estimate {
                Some(prev) => prev * (1.0 - RTT_ALPHA) + rtt_ms * RTT_ALPHA,
                None => rtt_ms,
            });
            debug!(rtt_ms, "Received pong");
        }
    }

    /// Record that any frame was received.
    pub fn record_message(&self) {
        let now = Utc::now();
        *self.last_message.write() = now;
        *self.last_seen.write() = Some(now);
    }

    /// Check if the outstanding ping has gone unanswered too long.
    pub fn is_timed_out(&self) -> bool {
        if !*self.waiting_for_pong.read() {
            return false;
        }

        if let Some(ping_time) = *self.last_ping.read() {
            let elapsed_ms = (Utc::now() - ping_time).num_milliseconds();
            return elapsed_ms > self.timeout_ms as i64;
        }

        false
    }

    /// Mark the connection degraded.
    pub fn mark_degraded(&self) {
        *self.degraded.write() = true;
    }

    /// Get time since last frame.
    pub fn time_since_last_message_ms(&self) -> i64 {
        (Utc::now() - *self.last_message.read()).num_milliseconds()
    }

    /// Check if a ping is due.
    pub fn should_send_heartbeat(&self) -> bool {
        if *self.waiting_for_pong.read() {
            return false;
        }

        self.time_since_last_message_ms() >= self.interval_ms as i64
    }

    /// Interval between liveness checks.
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis((self.interval_ms / 2).max(1))
    }

    /// Pollable snapshot.
    pub fn connection_health(&self) -> ConnectionHealth {
        ConnectionHealth {
            is_connected: self.write.is_connected(),
            last_seen: *self.last_seen.read(),
            round_trip_estimate: self
                .rtt_estimate_ms
                .read()
                .map(|ms| Duration::from_millis(ms.round() as u64)),
            degraded: *self.degraded.read(),
        }
    }
}
