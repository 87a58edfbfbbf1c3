//! Pull-based reconciliation against the order REST API.
//!
//! Push events can be missed while the channel is down, so the full order
//! list is fetched on mount, after every reconnect, and on manual refresh,
//! then merged into the store by timestamp.

use crate::error::SyncResult;
use crate::sender::BoxFuture;
use crate::store::{OrderStateStore, ReplaceSummary};
use orderlink_core::{Identity, Order, OrderDraft, OrderPage};
use orderlink_telemetry::Metrics;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Default page size for reconciliation fetches.
pub const DEFAULT_PAGE_SIZE: u32 = 50;
/// Default upper bound on pages fetched per run.
pub const DEFAULT_MAX_PAGES: u32 = 20;
/// Fetch attempts per run for retryable failures.
pub const MAX_FETCH_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Order REST collaborator.
#[cfg_attr(test, mockall::automock)]
pub trait OrderSource: Send + Sync {
    /// `fetchOrders(page, pageSize)` for `identity`. Pages are 1-based.
    fn fetch_orders(
        &self,
        identity: &Identity,
        page: u32,
        page_size: u32,
    ) -> BoxFuture<'static, SyncResult<OrderPage>>;

    /// `placeOrder(draft)` on behalf of `identity`.
    fn place_order(
        &self,
        identity: &Identity,
        draft: OrderDraft,
    ) -> BoxFuture<'static, SyncResult<Order>>;
}

/// Reconciler.
pub struct Reconciler {
    source: Arc<dyn OrderSource>,
    store: Arc<OrderStateStore>,
    page_size: u32,
    max_pages: u32,
    retry_delay: Duration,
    /// Held by the task currently running reconciliations.
    running: Mutex<()>,
    /// Identity of the latest request. A run whose target no longer matches
    /// is discarded.
    requested: parking_lot::Mutex<Option<Identity>>,
    /// Set by every request, cleared by the runner before each run.
    dirty: AtomicBool,
    busy: watch::Sender<bool>,
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn OrderSource>,
        store: Arc<OrderStateStore>,
        page_size: u32,
        max_pages: u32,
    ) -> Self {
        Self {
            source,
            store,
            page_size: page_size.max(1),
            max_pages: max_pages.max(1),
            retry_delay: DEFAULT_RETRY_DELAY,
            running: Mutex::new(()),
            requested: parking_lot::Mutex::new(None),
            dirty: AtomicBool::new(false),
            busy: watch::channel(false).0,
        }
    }

    /// Base delay before retrying a retryable fetch failure; doubles per attempt.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Fetch every page and merge into the store.
    ///
    /// If a run is already in progress the request is queued: the running
    /// task performs one more run for the latest requested identity, and
    /// this call returns `Ok(None)`. Otherwise returns the outcome of the
    /// last run this call performed. On error the cache is left untouched.
    pub async fn reconcile(&self, identity: &Identity) -> SyncResult<Option<ReplaceSummary>> {
        *self.requested.lock() = Some(identity.clone());
        self.dirty.store(true, Ordering::SeqCst);

        let mut last = Ok(None);
        loop {
            let Ok(guard) = self.running.try_lock() else {
                debug!(%identity, "Reconciliation already running, rerun queued");
                return last;
            };
            self.busy.send_replace(true);

            while self.dirty.swap(false, Ordering::SeqCst) {
                let Some(target) = self.requested.lock().clone() else {
                    break;
                };
                last = self.run_once(&target).await;
            }

            self.busy.send_replace(false);
            drop(guard);
            // A request may have landed after the last swap but before unlock.
            if !self.dirty.load(Ordering::SeqCst) {
                return last;
            }
        }
    }

    /// Resolve once no reconciliation is running.
    pub async fn wait_idle(&self) {
        let mut busy = self.busy.subscribe();
        let _ = busy.wait_for(|running| !running).await;
    }

    async fn run_once(&self, identity: &Identity) -> SyncResult<Option<ReplaceSummary>> {
        let mark = self.store.mark();
        let (orders, complete) = match self.fetch_with_retry(identity).await {
            Ok(fetched) => fetched,
            Err(e) => {
                Metrics::reconcile("error");
                warn!(%e, %identity, "Reconciliation failed, keeping cached orders");
                return Err(e);
            }
        };

        if self.requested.lock().as_ref() != Some(identity) {
            Metrics::reconcile("discarded");
            debug!(%identity, "Identity changed during fetch, discarding result");
            return Ok(None);
        }

        let fetched = orders.len();
        let Some(summary) = self.store.replace_all(orders, mark, complete) else {
            Metrics::reconcile("discarded");
            return Ok(None);
        };
        Metrics::reconcile("ok");
        info!(
            fetched,
            complete,
            applied = summary.applied,
            kept_local = summary.kept_local,
            removed = summary.removed,
            "Reconciliation complete"
        );
        Ok(Some(summary))
    }

    async fn fetch_with_retry(&self, identity: &Identity) -> SyncResult<(Vec<Order>, bool)> {
        let mut attempt = 1;
        let mut delay = self.retry_delay;
        loop {
            match self.fetch_all(identity).await {
                Err(e) if e.is_retryable() && attempt < MAX_FETCH_ATTEMPTS => {
                    warn!(
                        %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Order fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    delay *= 2;
                }
                result => return result,
            }
        }
    }

    /// Returns the fetched orders and whether every page was read.
    async fn fetch_all(&self, identity: &Identity) -> SyncResult<(Vec<Order>, bool)> {
        let mut orders = Vec::new();
        let mut page = 1;

        loop {
            let OrderPage {
                orders: batch,
                pagination,
            } = self
                .source
                .fetch_orders(identity, page, self.page_size)
                .await?;
            debug!(
                page,
                count = batch.len(),
                total_pages = pagination.total_pages,
                "Fetched order page"
            );
            orders.extend(batch);

            if !pagination.has_next() {
                return Ok((orders, true));
            }
            if page >= self.max_pages {
                warn!(
                    max_pages = self.max_pages,
                    total_pages = pagination.total_pages,
                    "Page limit reached, keeping orders missing from the partial list"
                );
                return Ok((orders, false));
            }
            page += 1;
        }
    }

    /// Place an order and merge the created record into the store.
    pub async fn place_order(&self, identity: &Identity, draft: OrderDraft) -> SyncResult<Order> {
        let order = self.source.place_order(identity, draft).await?;
        info!(order_id = %order.order_id, order_number = %order.order_number, "Order placed");
        self.store.upsert_fetched(order.clone());
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use mockall::predicate::{always, eq};
    use orderlink_core::{OrderId, OrderStatus, OrderStatusEvent, Pagination, Role};
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::{oneshot, Notify};

    fn order(id: &str, status: OrderStatus, last_updated: u64) -> Order {
        Order {
            order_id: OrderId::from(id),
            order_number: format!("ORD-{id}"),
            status,
            total_price: dec!(42.50),
            items: Vec::new(),
            last_updated,
            cancellation: None,
        }
    }

    fn buyer() -> Identity {
        Identity::buyer("B1").unwrap()
    }

    fn seller() -> Identity {
        Identity::new(Role::Seller, "S1").unwrap()
    }

    /// Fetch future that signals `started` and then waits for `release`.
    fn gated_page(
        started: Arc<Notify>,
        release: Option<oneshot::Receiver<()>>,
        orders: Vec<Order>,
    ) -> BoxFuture<'static, SyncResult<OrderPage>> {
        Box::pin(async move {
            started.notify_one();
            if let Some(rx) = release {
                let _ = rx.await;
            }
            Ok(page(orders, 1, 1))
        })
    }

    fn page(orders: Vec<Order>, page: u32, total_pages: u32) -> OrderPage {
        OrderPage {
            orders,
            pagination: Pagination {
                page,
                page_size: 2,
                total_pages,
                total: 0,
            },
        }
    }

    #[tokio::test]
    async fn test_fetches_all_pages() {
        let mut source = MockOrderSource::new();
        source
            .expect_fetch_orders()
            .with(always(), eq(1), eq(2))
            .times(1)
            .returning(|_, _, _| {
                let p = page(
                    vec![
                        order("A", OrderStatus::Pending, 1),
                        order("B", OrderStatus::Pending, 2),
                    ],
                    1,
                    2,
                );
                Box::pin(async move { Ok(p) })
            });
        source
            .expect_fetch_orders()
            .with(always(), eq(2), eq(2))
            .times(1)
            .returning(|_, _, _| {
                let p = page(vec![order("C", OrderStatus::Shipped, 3)], 2, 2);
                Box::pin(async move { Ok(p) })
            });

        let store = Arc::new(OrderStateStore::new());
        let reconciler = Reconciler::new(Arc::new(source), store.clone(), 2, 10);

        let summary = reconciler.reconcile(&buyer()).await.unwrap().unwrap();
        assert_eq!(summary.applied, 3);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_stops_at_page_limit() {
        let mut source = MockOrderSource::new();
        source.expect_fetch_orders().times(2).returning(|_, p, _| {
            let pg = page(vec![order(&format!("O{p}"), OrderStatus::Pending, 1)], p, 99);
            Box::pin(async move { Ok(pg) })
        });

        let store = Arc::new(OrderStateStore::new());
        store.apply_event(&OrderStatusEvent {
            order_id: OrderId::from("O-late"),
            order_number: None,
            status: OrderStatus::Pending,
            timestamp: 1,
        });
        let reconciler = Reconciler::new(Arc::new(source), store.clone(), 2, 2);

        let summary = reconciler.reconcile(&buyer()).await.unwrap().unwrap();
        // Orders beyond the last page read may still exist server-side.
        assert_eq!(summary.removed, 0);
        assert_eq!(store.len(), 3);
        assert!(store.get(&OrderId::from("O-late")).is_some());
    }

    #[tokio::test]
    async fn test_failure_leaves_cache_untouched() {
        let mut source = MockOrderSource::new();
        source
            .expect_fetch_orders()
            .times(1)
            .returning(|_, _, _| Box::pin(async { Err(SyncError::fetch("bad request")) }));

        let store = Arc::new(OrderStateStore::new());
        store.apply_event(&OrderStatusEvent {
            order_id: OrderId::from("O1"),
            order_number: None,
            status: OrderStatus::Processing,
            timestamp: 100,
        });
        let reconciler = Reconciler::new(Arc::new(source), store.clone(), 10, 10);

        assert!(matches!(
            reconciler.reconcile(&buyer()).await,
            Err(SyncError::Fetch { .. })
        ));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_retryable_failure_retried_within_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut source = MockOrderSource::new();
        source.expect_fetch_orders().times(2).returning(move |_, _, _| {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if call == 0 {
                    Err(SyncError::Fetch {
                        message: "HTTP 503: maintenance".to_string(),
                        retryable: true,
                    })
                } else {
                    Ok(page(vec![order("O1", OrderStatus::Pending, 5)], 1, 1))
                }
            })
        });

        let store = Arc::new(OrderStateStore::new());
        let reconciler = Reconciler::new(Arc::new(source), store.clone(), 10, 10)
            .with_retry_delay(Duration::from_millis(1));

        let summary = reconciler.reconcile(&buyer()).await.unwrap().unwrap();
        assert_eq!(summary.applied, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reconciled_state_beats_older_live_event() {
        let mut source = MockOrderSource::new();
        source.expect_fetch_orders().returning(|_, _, _| {
            let p = page(vec![order("O2", OrderStatus::Shipped, 200)], 1, 1);
            Box::pin(async move { Ok(p) })
        });

        let store = Arc::new(OrderStateStore::new());
        let reconciler = Reconciler::new(Arc::new(source), store.clone(), 10, 10);
        reconciler.reconcile(&buyer()).await.unwrap();

        let outcome = store.apply_event(&OrderStatusEvent {
            order_id: OrderId::from("O2"),
            order_number: None,
            status: OrderStatus::Processing,
            timestamp: 150,
        });

        assert!(outcome.is_stale());
        assert_eq!(
            store.get(&OrderId::from("O2")).unwrap().status,
            OrderStatus::Shipped
        );
    }

    #[tokio::test]
    async fn test_request_during_run_queues_rerun() {
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let release_rx = std::sync::Mutex::new(Some(release_rx));
        let started = Arc::new(Notify::new());
        let started_signal = started.clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut source = MockOrderSource::new();
        source.expect_fetch_orders().times(2).returning(move |_, _, _| {
            let orders = if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                vec![order("A", OrderStatus::Pending, 1)]
            } else {
                vec![
                    order("A", OrderStatus::Pending, 1),
                    order("B", OrderStatus::Pending, 2),
                ]
            };
            gated_page(started_signal.clone(), release_rx.lock().unwrap().take(), orders)
        });

        let store = Arc::new(OrderStateStore::new());
        let reconciler = Arc::new(Reconciler::new(Arc::new(source), store.clone(), 10, 10));

        let first = tokio::spawn({
            let reconciler = reconciler.clone();
            async move { reconciler.reconcile(&buyer()).await }
        });
        started.notified().await;

        // Queued onto the running task rather than dropped.
        assert!(reconciler.reconcile(&buyer()).await.unwrap().is_none());
        let _ = release_tx.send(());

        let summary = first.await.unwrap().unwrap().unwrap();
        assert_eq!(summary.applied, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.len(), 2);

        reconciler.wait_idle().await;
    }

    #[tokio::test]
    async fn test_identity_switch_during_fetch_discards_stale_result() {
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let release_rx = std::sync::Mutex::new(Some(release_rx));
        let started = Arc::new(Notify::new());
        let started_signal = started.clone();

        let mut source = MockOrderSource::new();
        source
            .expect_fetch_orders()
            .withf(|identity, _, _| identity.id == "B1")
            .times(1)
            .returning(move |_, _, _| {
                gated_page(
                    started_signal.clone(),
                    release_rx.lock().unwrap().take(),
                    vec![order("B1-order", OrderStatus::Pending, 1)],
                )
            });
        source
            .expect_fetch_orders()
            .withf(|identity, _, _| identity.id == "S1")
            .times(1)
            .returning(|_, _, _| {
                let p = page(vec![order("S1-order", OrderStatus::Pending, 1)], 1, 1);
                Box::pin(async move { Ok(p) })
            });

        let store = Arc::new(OrderStateStore::new());
        let reconciler = Arc::new(Reconciler::new(Arc::new(source), store.clone(), 10, 10));

        let first = tokio::spawn({
            let reconciler = reconciler.clone();
            async move { reconciler.reconcile(&buyer()).await }
        });
        started.notified().await;

        store.clear();
        assert!(reconciler.reconcile(&seller()).await.unwrap().is_none());
        let _ = release_tx.send(());
        first.await.unwrap().unwrap();

        let ids: Vec<OrderId> = store.snapshot().into_iter().map(|o| o.order_id).collect();
        assert_eq!(ids, vec![OrderId::from("S1-order")]);
    }

    #[tokio::test]
    async fn test_clear_during_fetch_discards_result() {
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let release_rx = std::sync::Mutex::new(Some(release_rx));
        let started = Arc::new(Notify::new());
        let started_signal = started.clone();

        let mut source = MockOrderSource::new();
        source.expect_fetch_orders().times(1).returning(move |_, _, _| {
            gated_page(
                started_signal.clone(),
                release_rx.lock().unwrap().take(),
                vec![order("B1-order", OrderStatus::Pending, 1)],
            )
        });

        let store = Arc::new(OrderStateStore::new());
        let reconciler = Arc::new(Reconciler::new(Arc::new(source), store.clone(), 10, 10));

        let first = tokio::spawn({
            let reconciler = reconciler.clone();
            async move { reconciler.reconcile(&buyer()).await }
        });
        started.notified().await;

        store.clear();
        let _ = release_tx.send(());

        assert!(first.await.unwrap().unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_place_order_inserts_created_record() {
        let mut source = MockOrderSource::new();
        source.expect_place_order().times(1).returning(|_, _| {
            let created = order("O9", OrderStatus::Pending, 500);
            Box::pin(async move { Ok(created) })
        });

        let store = Arc::new(OrderStateStore::new());
        let reconciler = Reconciler::new(Arc::new(source), store.clone(), 10, 10);

        let draft = OrderDraft {
            items: Vec::new(),
            shipping_address: None,
            payment_method: None,
        };
        let created = reconciler.place_order(&buyer(), draft).await.unwrap();

        assert_eq!(created.total_price, dec!(42.50));
        assert_eq!(store.get(&OrderId::from("O9")), Some(created));
    }
}
