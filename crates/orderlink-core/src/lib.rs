//! Core domain types for the orderlink order-status sync client.
//!
//! This crate provides the types shared by the channel, the sync engine and
//! the REST collaborator:
//! - `Identity`, `Role`: externally supplied buyer/seller identity
//! - `Order`, `OrderStatus`, `Cancellation`: the cached order record
//! - `OrderStatusEvent`, `CancellationAck`: transient inbound events
//! - `CommandOutcome`, `RejectReason`: results of user-initiated commands
//! - `OrderPage`, `OrderDraft`: REST collaborator payloads

pub mod command;
pub mod error;
pub mod event;
pub mod identity;
pub mod order;
pub mod page;

pub use command::{CommandKind, CommandOutcome, RejectReason};
pub use error::{CoreError, Result};
pub use event::{CancellationAck, OrderStatusEvent};
pub use identity::{Identity, Role};
pub use order::{now_ms, Cancellation, Order, OrderId, OrderItem, OrderStatus, TimestampMs};
pub use page::{DraftItem, OrderDraft, OrderPage, Pagination};
