//! Prometheus metrics for orderlink.
//!
//! Covers:
//! - Channel connection state and reconnects
//! - Inbound events by outcome (applied / stale)
//! - Cancellation commands by outcome
//! - Reconciliation runs
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_int_gauge, CounterVec,
    Encoder, Gauge, GaugeVec, IntGauge, TextEncoder,
};

/// Channel connection state (1 = connected, 0 = disconnected).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "orderlink_ws_connected",
        "Channel connection state (1=connected)"
    )
    .unwrap()
});

/// Channel state machine current state.
/// Labels: state (disconnected/connecting/connected/reconnecting)
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "orderlink_ws_state",
        "Channel state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Total channel session losses that led to a reconnect.
pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "orderlink_ws_reconnect_total",
        "Total channel reconnections",
        &["reason"]
    )
    .unwrap()
});

/// Inbound events by type and outcome.
/// Labels: event (order-update/order-cancelled), outcome (inserted/updated/stale)
pub static EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "orderlink_events_total",
        "Inbound order events by outcome",
        &["event", "outcome"]
    )
    .unwrap()
});

/// Cancellation commands by outcome.
/// Labels: outcome (acked/timed_out/rejected)
pub static COMMANDS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "orderlink_commands_total",
        "Cancellation commands by terminal outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Commands currently awaiting an ack.
pub static COMMANDS_INFLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "orderlink_commands_inflight",
        "Commands awaiting acknowledgment"
    )
    .unwrap()
});

/// Reconciliation runs by result.
/// Labels: result (ok/error)
pub static RECONCILE_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "orderlink_reconcile_total",
        "Reconciliation fetches by result",
        &["result"]
    )
    .unwrap()
});

/// Orders held in the local cache.
pub static ORDERS_CACHED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("orderlink_orders_cached", "Orders held in the local cache").unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Record channel connected.
    pub fn ws_connected() {
        WS_CONNECTED.set(1.0);
        Self::ws_state_set("connected");
    }

    /// Record channel disconnected.
    pub fn ws_disconnected() {
        WS_CONNECTED.set(0.0);
    }

    /// Set channel state machine state.
    /// Only the active state should be set to 1, all others to 0.
    pub fn ws_state_set(state: &str) {
        for s in &["disconnected", "connecting", "connected", "reconnecting"] {
            WS_STATE.with_label_values(&[s]).set(0.0);
        }
        WS_STATE.with_label_values(&[state]).set(1.0);
    }

    /// Record a session loss.
    pub fn ws_reconnect(reason: &str) {
        WS_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Record an inbound event outcome.
    pub fn event(event: &str, outcome: &str) {
        EVENTS_TOTAL.with_label_values(&[event, outcome]).inc();
    }

    /// Record a command's terminal outcome.
    pub fn command_outcome(outcome: &str) {
        COMMANDS_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// Set number of in-flight commands.
    pub fn commands_inflight_set(count: i64) {
        COMMANDS_INFLIGHT.set(count);
    }

    /// Record a reconciliation run.
    pub fn reconcile(result: &str) {
        RECONCILE_TOTAL.with_label_values(&[result]).inc();
    }

    /// Set cache size.
    pub fn orders_cached(count: i64) {
        ORDERS_CACHED.set(count);
    }

    /// Render all registered metrics in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}
