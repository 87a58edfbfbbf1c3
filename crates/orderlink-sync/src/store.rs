//! Canonical local cache of order records.
//!
//! Last-write-wins by server timestamp. The store is the only writer of
//! order state; everyone else reads cloned snapshots or subscribes to
//! change notifications. Locks are never held while subscriber callbacks run.

use crate::error::{SyncError, SyncResult};
use orderlink_core::{Cancellation, Order, OrderId, OrderStatus, OrderStatusEvent, TimestampMs};
use orderlink_telemetry::Metrics;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Result of applying one event to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// Order was not cached; a fresh record was created.
    Inserted(Order),
    /// Cached order was updated.
    Updated(Order),
    /// Event was not newer than the cached record and was dropped.
    Stale {
        order_id: OrderId,
        event_ts: TimestampMs,
        cached_ts: TimestampMs,
    },
}

impl ApplyOutcome {
    /// The resulting record, if the event took effect.
    pub fn applied(&self) -> Option<&Order> {
        match self {
            Self::Inserted(order) | Self::Updated(order) => Some(order),
            Self::Stale { .. } => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }

    /// Label used for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Inserted(_) => "inserted",
            Self::Updated(_) => "updated",
            Self::Stale { .. } => "stale",
        }
    }

    pub fn into_result(self) -> SyncResult<Order> {
        match self {
            Self::Inserted(order) | Self::Updated(order) => Ok(order),
            Self::Stale {
                order_id,
                event_ts,
                cached_ts,
            } => Err(SyncError::StaleEventIgnored {
                order_id,
                event_ts,
                cached_ts,
            }),
        }
    }
}

/// Counts from a reconciliation merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceSummary {
    /// Fetched records written to the cache.
    pub applied: usize,
    /// Cached records kept because they were newer than the fetch.
    pub kept_local: usize,
    /// Cached records absent from the fetched set.
    pub removed: usize,
}

/// Cache position captured before a reconciliation fetch starts.
///
/// Passed back to [`OrderStateStore::replace_all`] so the merge can tell
/// which cached records were written while the fetch was in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchMark {
    generation: u64,
    write_seq: u64,
}

/// Change notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderChange {
    /// One order was created or changed.
    Upserted(Order),
    /// The whole set was reconciled.
    Replaced(ReplaceSummary),
}

/// Subscriber callback.
pub type OrderCallback = Arc<dyn Fn(&OrderChange) + Send + Sync>;

type SubscriberMap = RwLock<BTreeMap<u64, OrderCallback>>;

/// Handle returned by [`OrderStateStore::subscribe`].
#[must_use = "dropping the handle keeps the callback registered; call unsubscribe() to remove it"]
pub struct OrderSubscription {
    id: u64,
    subscribers: Weak<SubscriberMap>,
}

impl OrderSubscription {
    /// Remove the callback. Returns false if the store is gone.
    pub fn unsubscribe(self) -> bool {
        match self.subscribers.upgrade() {
            Some(subscribers) => subscribers.write().remove(&self.id).is_some(),
            None => false,
        }
    }
}

#[derive(Default)]
struct Cache {
    orders: HashMap<OrderId, Order>,
    /// Write sequence of the last local write per order.
    touched: HashMap<OrderId, u64>,
    write_seq: u64,
    /// Bumped by `clear`; merges started before it are discarded.
    generation: u64,
}

impl Cache {
    fn touch(&mut self, order_id: &OrderId) {
        self.write_seq += 1;
        self.touched.insert(order_id.clone(), self.write_seq);
    }

    fn written_since(&self, order_id: &OrderId, mark: &FetchMark) -> bool {
        self.touched
            .get(order_id)
            .is_some_and(|seq| *seq > mark.write_seq)
    }
}

/// Order state store.
pub struct OrderStateStore {
    state: RwLock<Cache>,
    subscribers: Arc<SubscriberMap>,
    next_subscriber_id: AtomicU64,
}

impl Default for OrderStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderStateStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Cache::default()),
            subscribers: Arc::new(RwLock::new(BTreeMap::new())),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    /// Capture the cache position before fetching.
    pub fn mark(&self) -> FetchMark {
        let cache = self.state.read();
        FetchMark {
            generation: cache.generation,
            write_seq: cache.write_seq,
        }
    }

    /// Merge a fresh fetch into the cache.
    ///
    /// A cached record survives only if strictly newer than the fetched one;
    /// ties go to the fetch. Records absent from the fetch are dropped unless
    /// they were written locally after `mark`, or `complete` is false because
    /// the fetch stopped short of the last page.
    ///
    /// Returns `None` without touching the cache when the store was cleared
    /// after `mark` was taken.
    pub fn replace_all(
        &self,
        fetched: Vec<Order>,
        mark: FetchMark,
        complete: bool,
    ) -> Option<ReplaceSummary> {
        let summary = {
            let mut cache = self.state.write();
            if cache.generation != mark.generation {
                debug!("Order cache cleared during fetch, discarding result");
                return None;
            }

            let mut next: HashMap<OrderId, Order> = HashMap::with_capacity(fetched.len());
            let mut summary = ReplaceSummary::default();

            for order in fetched {
                if next
                    .get(&order.order_id)
                    .is_some_and(|seen| seen.last_updated >= order.last_updated)
                {
                    continue;
                }
                match cache.orders.get(&order.order_id) {
                    Some(cached) if cached.last_updated > order.last_updated => {
                        summary.kept_local += 1;
                        next.insert(order.order_id.clone(), cached.clone());
                    }
                    _ => {
                        summary.applied += 1;
                        next.insert(order.order_id.clone(), order);
                    }
                }
            }

            for (order_id, cached) in &cache.orders {
                if next.contains_key(order_id) {
                    continue;
                }
                if !complete || cache.written_since(order_id, &mark) {
                    summary.kept_local += 1;
                    next.insert(order_id.clone(), cached.clone());
                } else {
                    summary.removed += 1;
                }
            }

            cache
                .touched
                .retain(|order_id, seq| *seq > mark.write_seq && next.contains_key(order_id));
            cache.orders = next;
            Metrics::orders_cached(cache.orders.len() as i64);
            summary
        };

        debug!(?summary, complete, "Order cache reconciled");
        self.notify(&OrderChange::Replaced(summary));
        Some(summary)
    }

    /// Merge a single authoritative record (e.g. a freshly placed order).
    ///
    /// Returns false when the cached copy is newer.
    pub fn upsert_fetched(&self, order: Order) -> bool {
        let written = {
            let mut cache = self.state.write();
            match cache.orders.get(&order.order_id) {
                Some(cached) if cached.last_updated > order.last_updated => None,
                _ => {
                    cache.touch(&order.order_id);
                    cache.orders.insert(order.order_id.clone(), order.clone());
                    Metrics::orders_cached(cache.orders.len() as i64);
                    Some(order)
                }
            }
        };

        match written {
            Some(order) => {
                self.notify(&OrderChange::Upserted(order));
                true
            }
            None => false,
        }
    }

    /// Apply a status push. Only strictly newer events take effect.
    pub fn apply_event(&self, event: &OrderStatusEvent) -> ApplyOutcome {
        let outcome = {
            let mut cache = self.state.write();
            let outcome = match cache.orders.get_mut(&event.order_id) {
                None => {
                    let order = Order::from_event(event);
                    cache.orders.insert(order.order_id.clone(), order.clone());
                    ApplyOutcome::Inserted(order)
                }
                Some(cached) if cached.is_older_than(event.timestamp) => {
                    cached.status = event.status;
                    cached.last_updated = event.timestamp;
                    if event.status != OrderStatus::Cancelled {
                        cached.cancellation = None;
                    }
                    if cached.order_number.is_empty() {
                        if let Some(number) = &event.order_number {
                            cached.order_number = number.clone();
                        }
                    }
                    ApplyOutcome::Updated(cached.clone())
                }
                Some(cached) => ApplyOutcome::Stale {
                    order_id: event.order_id.clone(),
                    event_ts: event.timestamp,
                    cached_ts: cached.last_updated,
                },
            };
            if outcome.applied().is_some() {
                cache.touch(&event.order_id);
            }
            Metrics::orders_cached(cache.orders.len() as i64);
            outcome
        };

        if let Some(order) = outcome.applied() {
            self.notify(&OrderChange::Upserted(order.clone()));
        }
        outcome
    }

    /// Apply a confirmed cancellation.
    ///
    /// The ack is authoritative for its own timestamp: it wins ties and
    /// loses only to a strictly newer cached record.
    pub fn apply_cancellation_ack(
        &self,
        order_id: &OrderId,
        order_number: Option<&str>,
        cancellation: Cancellation,
    ) -> ApplyOutcome {
        let outcome = {
            let mut cache = self.state.write();
            let at = cancellation.at;
            let outcome = match cache.orders.get_mut(order_id) {
                None => {
                    let order = Order {
                        order_id: order_id.clone(),
                        order_number: order_number.unwrap_or_default().to_string(),
                        status: OrderStatus::Cancelled,
                        total_price: Default::default(),
                        items: Vec::new(),
                        last_updated: at,
                        cancellation: Some(cancellation),
                    };
                    cache.orders.insert(order_id.clone(), order.clone());
                    ApplyOutcome::Inserted(order)
                }
                Some(cached) if cached.last_updated <= at => {
                    cached.status = OrderStatus::Cancelled;
                    cached.last_updated = at;
                    cached.cancellation = Some(cancellation);
                    ApplyOutcome::Updated(cached.clone())
                }
                Some(cached) => ApplyOutcome::Stale {
                    order_id: order_id.clone(),
                    event_ts: at,
                    cached_ts: cached.last_updated,
                },
            };
            if outcome.applied().is_some() {
                cache.touch(order_id);
            }
            Metrics::orders_cached(cache.orders.len() as i64);
            outcome
        };

        if let Some(order) = outcome.applied() {
            self.notify(&OrderChange::Upserted(order.clone()));
        }
        outcome
    }

    /// Drop every cached order (identity switch).
    ///
    /// Reconciliations already in flight are discarded when they land.
    pub fn clear(&self) {
        let removed = {
            let mut cache = self.state.write();
            let removed = cache.orders.len();
            cache.orders.clear();
            cache.touched.clear();
            cache.generation += 1;
            Metrics::orders_cached(0);
            removed
        };
        debug!(removed, "Order cache cleared");
        self.notify(&OrderChange::Replaced(ReplaceSummary {
            removed,
            ..ReplaceSummary::default()
        }));
    }

    /// Get one order.
    pub fn get(&self, order_id: &OrderId) -> Option<Order> {
        self.state.read().orders.get(order_id).cloned()
    }

    /// Timestamp of the cached record.
    pub fn last_updated(&self, order_id: &OrderId) -> Option<TimestampMs> {
        self.state.read().orders.get(order_id).map(|o| o.last_updated)
    }

    /// All orders, most recently updated first.
    pub fn snapshot(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.state.read().orders.values().cloned().collect();
        orders.sort_by(|a, b| {
            b.last_updated
                .cmp(&a.last_updated)
                .then_with(|| a.order_id.cmp(&b.order_id))
        });
        orders
    }

    pub fn len(&self) -> usize {
        self.state.read().orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().orders.is_empty()
    }

    /// Register a change callback.
    pub fn subscribe<F>(&self, callback: F) -> OrderSubscription
    where
        F: Fn(&OrderChange) + Send + Sync + 'static,
    {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.write().insert(id, Arc::new(callback));
        OrderSubscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    fn notify(&self, change: &OrderChange) {
        let callbacks: Vec<OrderCallback> = self.subscribers.read().values().cloned().collect();
        for callback in callbacks {
            callback(change);
        }
    }
}
