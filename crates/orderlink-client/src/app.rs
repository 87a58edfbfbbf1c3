//! Main application orchestration.
//!
//! Builds the REST collaborator and the sync client from configuration,
//! binds the channel to the configured identity, and either runs until
//! Ctrl-C or performs a single cancellation.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use orderlink_core::{CommandOutcome, Identity, OrderId};
use orderlink_rest::RestClient;
use orderlink_sync::{DispatchedEvent, EventType, OrderChange, OrderSource, OrderSyncClient};
use orderlink_telemetry::Metrics;
use orderlink_ws::ConnectionState;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Main application.
pub struct Application {
    config: AppConfig,
    identity: Identity,
    client: OrderSyncClient,
}

impl Application {
    /// Create a new application. Must be called inside the Tokio runtime.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        let identity = config.identity()?;
        let rest = RestClient::with_timeout(config.api_base_url.clone(), config.http_timeout())?;
        Ok(Self::with_source(config, identity, Arc::new(rest)))
    }

    /// Build around an explicit order source.
    pub fn with_source(
        config: AppConfig,
        identity: Identity,
        source: Arc<dyn OrderSource>,
    ) -> Self {
        let client = OrderSyncClient::new(config.sync_config(), source);
        Self {
            config,
            identity,
            client,
        }
    }

    pub fn client(&self) -> &OrderSyncClient {
        &self.client
    }

    /// Connect and wait until the channel is live.
    pub async fn start(&self, wait: Duration) -> AppResult<()> {
        self.client.connect(self.identity.clone()).await?;

        let connected = tokio::time::timeout(wait, async {
            let mut poll = tokio::time::interval(Duration::from_millis(50));
            loop {
                poll.tick().await;
                if self.client.connection_status().state == ConnectionState::Connected {
                    return;
                }
            }
        })
        .await;

        if connected.is_err() {
            return Err(AppError::ConnectTimeout(wait.as_millis() as u64));
        }
        info!(identity = %self.identity, "Channel live");
        Ok(())
    }

    /// Run until Ctrl-C, logging order changes and periodic health samples.
    pub async fn run(self) -> AppResult<()> {
        info!(identity = %self.identity, ws_url = %self.config.ws_url, "Starting order sync");

        let dispatcher = self.client.dispatcher();
        dispatcher.on(EventType::OrderUpdate, |event| {
            let order = event.order();
            info!(order_id = %order.order_id, status = %order.status, "Order status changed");
        });
        dispatcher.on(EventType::OrderCancelled, |event| {
            if let DispatchedEvent::OrderCancelled { order, outcome } = event {
                info!(
                    order_id = %order.order_id,
                    requested_here = outcome.is_some(),
                    "Order cancelled"
                );
            }
        });
        let subscription = self.client.subscribe_to_orders(|change| {
            if let OrderChange::Replaced(summary) = change {
                info!(?summary, "Orders reconciled");
            }
        });

        self.client.connect(self.identity.clone()).await?;

        let mut status_tick =
            tokio::time::interval(Duration::from_millis(self.config.status_interval_ms.max(1)));
        status_tick.tick().await;

        loop {
            tokio::select! {
                _ = status_tick.tick() => {
                    let health = self.client.connection_health();
                    let status = self.client.connection_status();
                    info!(
                        state = %status.state,
                        reconnect_attempts = status.reconnect_attempts,
                        degraded = health.degraded,
                        rtt_ms = health.round_trip_estimate.map(|d| d.as_millis() as u64),
                        orders = self.client.order_snapshot().len(),
                        "Connection health"
                    );
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        subscription.unsubscribe();
        dispatcher.off(EventType::OrderUpdate);
        dispatcher.off(EventType::OrderCancelled);
        self.client.disconnect().await;
        if let Ok(metrics) = Metrics::render() {
            debug!(%metrics, "Final metrics");
        }
        info!(orders = self.client.order_snapshot().len(), "Shut down");
        Ok(())
    }

    /// Connect, cancel one order, disconnect.
    pub async fn cancel_once(self, order_id: &OrderId, reason: &str) -> AppResult<CommandOutcome> {
        let wait = Duration::from_millis(self.config.command_timeout_ms);
        self.start(wait).await?;

        // The cancel precheck reads the cache, so it must be populated first.
        match self.client.refresh().await {
            Ok(Some(_)) => {}
            Ok(None) => {
                if tokio::time::timeout(wait, self.client.wait_for_reconcile())
                    .await
                    .is_err()
                {
                    warn!("Reconciliation still running, cancelling against cached orders");
                }
            }
            Err(e) => warn!(%e, "Could not refresh orders before cancelling"),
        }

        let outcome = self.client.cancel_order(order_id, reason).await;
        match &outcome {
            CommandOutcome::Acked { cancellation, .. } => {
                info!(%order_id, by = %cancellation.by, "Cancellation confirmed")
            }
            CommandOutcome::TimedOut { .. } => {
                warn!(%order_id, "Cancellation unconfirmed; refresh to see the final status")
            }
            CommandOutcome::Rejected { reason, .. } => {
                warn!(%order_id, %reason, "Cancellation rejected")
            }
        }

        self.client.disconnect().await;
        Ok(outcome)
    }
}
