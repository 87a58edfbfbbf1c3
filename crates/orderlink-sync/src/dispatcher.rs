//! Typed event bus for inbound order events.
//!
//! Routes channel messages to the order store and the command correlator,
//! then fans successful applies out to registered handlers. Handlers are
//! paired `on`/`off` registrations; nothing accumulates across reconnects.

use crate::correlator::CommandCorrelator;
use crate::store::{ApplyOutcome, OrderStateStore};
use orderlink_core::{CommandOutcome, Order};
use orderlink_telemetry::Metrics;
use orderlink_ws::InboundMessage;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Event types handlers can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    OrderUpdate,
    OrderCancelled,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderUpdate => "order-update",
            Self::OrderCancelled => "order-cancelled",
        }
    }
}

/// Event delivered to handlers after it took effect.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchedEvent {
    /// Status push applied; carries the resulting record.
    OrderUpdated(Order),
    /// Cancellation ack applied.
    OrderCancelled {
        order: Order,
        /// Present when the ack resolved a command from this client.
        outcome: Option<CommandOutcome>,
    },
}

impl DispatchedEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::OrderUpdated(_) => EventType::OrderUpdate,
            Self::OrderCancelled { .. } => EventType::OrderCancelled,
        }
    }

    pub fn order(&self) -> &Order {
        match self {
            Self::OrderUpdated(order) | Self::OrderCancelled { order, .. } => order,
        }
    }
}

/// Registration id returned by [`EventDispatcher::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

/// Event handler callback.
pub type EventHandler = Arc<dyn Fn(&DispatchedEvent) + Send + Sync>;

struct Registration {
    id: HandlerId,
    event_type: EventType,
    handler: EventHandler,
}

/// Event dispatcher.
pub struct EventDispatcher {
    store: Arc<OrderStateStore>,
    correlator: Arc<CommandCorrelator>,
    handlers: RwLock<Vec<Registration>>,
    next_handler_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new(store: Arc<OrderStateStore>, correlator: Arc<CommandCorrelator>) -> Self {
        Self {
            store,
            correlator,
            handlers: RwLock::new(Vec::new()),
            next_handler_id: AtomicU64::new(1),
        }
    }

    /// Register a handler. Earlier registrations for the same type are kept.
    pub fn on<F>(&self, event_type: EventType, handler: F) -> HandlerId
    where
        F: Fn(&DispatchedEvent) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_handler_id.fetch_add(1, Ordering::SeqCst));
        self.handlers.write().push(Registration {
            id,
            event_type,
            handler: Arc::new(handler),
        });
        debug!(event = event_type.as_str(), ?id, "Handler registered");
        id
    }

    /// Remove every handler for `event_type`. Returns how many were removed.
    pub fn off(&self, event_type: EventType) -> usize {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|r| r.event_type != event_type);
        before - handlers.len()
    }

    /// Remove a single handler.
    pub fn remove(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|r| r.id != id);
        before != handlers.len()
    }

    pub fn handler_count(&self, event_type: EventType) -> usize {
        self.handlers
            .read()
            .iter()
            .filter(|r| r.event_type == event_type)
            .count()
    }

    /// Route one inbound message.
    ///
    /// Returns the event delivered to handlers, or `None` when the message
    /// had no effect (stale, duplicate, or not an order event).
    pub fn dispatch(&self, msg: InboundMessage) -> Option<DispatchedEvent> {
        let event = match msg {
            InboundMessage::OrderUpdate(event) => {
                let outcome = self.store.apply_event(&event);
                Metrics::event(EventType::OrderUpdate.as_str(), outcome.label());
                match outcome {
                    ApplyOutcome::Inserted(order) | ApplyOutcome::Updated(order) => {
                        debug!(
                            order_id = %order.order_id,
                            status = %order.status,
                            timestamp = order.last_updated,
                            "Order update applied"
                        );
                        DispatchedEvent::OrderUpdated(order)
                    }
                    stale @ ApplyOutcome::Stale { .. } => {
                        if let Err(e) = stale.into_result() {
                            debug!(%e, "Order update dropped");
                        }
                        return None;
                    }
                }
            }
            InboundMessage::OrderCancelled(ack) => {
                let resolution = self.correlator.resolve_ack(&ack);
                Metrics::event(
                    EventType::OrderCancelled.as_str(),
                    resolution.applied.label(),
                );
                match resolution.applied {
                    ApplyOutcome::Inserted(order) | ApplyOutcome::Updated(order) => {
                        DispatchedEvent::OrderCancelled {
                            order,
                            outcome: resolution.outcome,
                        }
                    }
                    stale @ ApplyOutcome::Stale { .. } => {
                        if let Err(e) = stale.into_result() {
                            debug!(%e, "Cancellation ack older than cached record");
                        }
                        return None;
                    }
                }
            }
            InboundMessage::Pong => return None,
            InboundMessage::Error(message) => {
                warn!(%message, "Server reported an error");
                return None;
            }
            InboundMessage::Unknown { event } => {
                trace!(%event, "Ignoring unknown event");
                return None;
            }
        };

        self.notify(&event);
        Some(event)
    }

    fn notify(&self, event: &DispatchedEvent) {
        let event_type = event.event_type();
        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .iter()
            .filter(|r| r.event_type == event_type)
            .map(|r| r.handler.clone())
            .collect();

        for handler in handlers {
            handler(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::MockCommandSender;
    use orderlink_core::{CancellationAck, OrderId, OrderStatus, OrderStatusEvent};
    use parking_lot::Mutex;

    fn dispatcher() -> (EventDispatcher, Arc<OrderStateStore>) {
        let store = Arc::new(OrderStateStore::new());
        let correlator = Arc::new(CommandCorrelator::new(
            Arc::new(MockCommandSender::new()),
            store.clone(),
            1_000,
            "buyer",
        ));
        (EventDispatcher::new(store.clone(), correlator), store)
    }

    fn update(order_id: &str, status: OrderStatus, timestamp: u64) -> InboundMessage {
        InboundMessage::OrderUpdate(OrderStatusEvent {
            order_id: OrderId::from(order_id),
            order_number: None,
            status,
            timestamp,
        })
    }

    #[test]
    fn test_processing_then_older_pending_keeps_processing() {
        let (dispatcher, store) = dispatcher();

        assert!(dispatcher
            .dispatch(update("O1", OrderStatus::Processing, 100))
            .is_some());
        assert!(dispatcher
            .dispatch(update("O1", OrderStatus::Pending, 50))
            .is_none());

        assert_eq!(
            store.get(&OrderId::from("O1")).unwrap().status,
            OrderStatus::Processing
        );
    }

    #[test]
    fn test_multiple_handlers_all_called() {
        let (dispatcher, _store) = dispatcher();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b"] {
            let seen = seen.clone();
            dispatcher.on(EventType::OrderUpdate, move |event| {
                seen.lock().push((tag, event.order().status));
            });
        }

        dispatcher.dispatch(update("O1", OrderStatus::Shipped, 10));

        assert_eq!(
            *seen.lock(),
            vec![("a", OrderStatus::Shipped), ("b", OrderStatus::Shipped)]
        );
    }

    #[test]
    fn test_stale_event_not_delivered_to_handlers() {
        let (dispatcher, _store) = dispatcher();
        let count = Arc::new(AtomicU64::new(0));
        let counter = count.clone();
        dispatcher.on(EventType::OrderUpdate, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.dispatch(update("O1", OrderStatus::Processing, 100));
        dispatcher.dispatch(update("O1", OrderStatus::Processing, 100));
        dispatcher.dispatch(update("O1", OrderStatus::Pending, 90));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_removes_all_handlers_for_type() {
        let (dispatcher, _store) = dispatcher();
        dispatcher.on(EventType::OrderUpdate, |_| {});
        dispatcher.on(EventType::OrderUpdate, |_| {});
        dispatcher.on(EventType::OrderCancelled, |_| {});

        assert_eq!(dispatcher.off(EventType::OrderUpdate), 2);
        assert_eq!(dispatcher.handler_count(EventType::OrderUpdate), 0);
        assert_eq!(dispatcher.handler_count(EventType::OrderCancelled), 1);
    }

    #[test]
    fn test_remove_single_handler() {
        let (dispatcher, _store) = dispatcher();
        let first = dispatcher.on(EventType::OrderUpdate, |_| {});
        dispatcher.on(EventType::OrderUpdate, |_| {});

        assert!(dispatcher.remove(first));
        assert!(!dispatcher.remove(first));
        assert_eq!(dispatcher.handler_count(EventType::OrderUpdate), 1);
    }

    #[test]
    fn test_unsolicited_cancellation_delivered() {
        let (dispatcher, store) = dispatcher();
        dispatcher.dispatch(update("O1", OrderStatus::Pending, 100));

        let delivered = dispatcher.dispatch(InboundMessage::OrderCancelled(CancellationAck {
            order_id: OrderId::from("O1"),
            order_number: Some("ORD-1".to_string()),
            cancelled_by: Some("seller".to_string()),
            reason: None,
            timestamp: Some(200),
        }));

        match delivered {
            Some(DispatchedEvent::OrderCancelled { order, outcome }) => {
                assert_eq!(order.status, OrderStatus::Cancelled);
                assert!(outcome.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_non_order_messages_ignored() {
        let (dispatcher, store) = dispatcher();
        assert!(dispatcher.dispatch(InboundMessage::Pong).is_none());
        assert!(dispatcher
            .dispatch(InboundMessage::Error("boom".to_string()))
            .is_none());
        assert!(dispatcher
            .dispatch(InboundMessage::Unknown {
                event: "debug".to_string()
            })
            .is_none());
        assert!(store.is_empty());
    }
}
