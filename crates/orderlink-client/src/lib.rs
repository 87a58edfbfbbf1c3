//! Buyer-facing order status client.
//!
//! Wires configuration, the REST collaborator and the order sync client
//! into a runnable application:
//! - Channel connection bound to the configured identity
//! - Live order status with reconciliation after reconnects
//! - One-shot cancellation with confirmed/unconfirmed reporting

pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
