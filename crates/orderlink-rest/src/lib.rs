//! REST collaborator for the order sync client.
//!
//! `fetchOrders` feeds reconciliation; `placeOrder` creates orders outside
//! the push channel. Both authenticate with the bound identity's headers.

pub mod client;
pub mod error;

pub use client::{RestClient, HEADER_USER_ID, HEADER_USER_ROLE};
pub use error::{RestError, RestResult};
