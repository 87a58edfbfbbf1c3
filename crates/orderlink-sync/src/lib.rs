//! Order state synchronization.
//!
//! Keeps a local order cache consistent with the server over an unreliable
//! push channel:
//! - `OrderStateStore`: last-write-wins cache keyed by order id
//! - `EventDispatcher`: typed routing of inbound events with paired `on`/`off`
//! - `CommandCorrelator`: cancel commands matched to their acks under a deadline
//! - `Reconciler`: paged REST fetch merged into the cache after reconnects
//! - `OrderSyncClient`: the context object wiring these to one channel

pub mod client;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod reconcile;
pub mod sender;
pub mod store;

pub use client::{OrderSyncClient, SyncConfig};
pub use correlator::{
    AckResolution, CommandCorrelator, CommandOutcomeExt, DEFAULT_COMMAND_TIMEOUT_MS,
};
pub use dispatcher::{DispatchedEvent, EventDispatcher, EventHandler, EventType, HandlerId};
pub use error::{SyncError, SyncResult};
pub use reconcile::{OrderSource, Reconciler, DEFAULT_MAX_PAGES, DEFAULT_PAGE_SIZE};
pub use sender::{BoxFuture, CommandSender, DynCommandSender, MockCommandSender};
pub use store::{
    ApplyOutcome, FetchMark, OrderCallback, OrderChange, OrderStateStore, OrderSubscription,
    ReplaceSummary,
};
