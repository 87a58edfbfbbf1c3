//! orderlink client - entry point
//!
//! Runs the order sync client until Ctrl-C, or sends a single cancellation
//! with `--cancel <ORDER_ID>`.

use anyhow::Result;
use clap::Parser;
use orderlink_client::{AppConfig, Application};
use orderlink_core::{OrderId, Role};
use tracing::info;

/// Real-time order status client
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via ORDERLINK_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the configured role (buyer or seller)
    #[arg(long)]
    role: Option<Role>,

    /// Override the configured identity id
    #[arg(long)]
    id: Option<String>,

    /// Cancel this order and exit
    #[arg(long, value_name = "ORDER_ID")]
    cancel: Option<String>,

    /// Reason sent with --cancel
    #[arg(long, default_value = "Cancelled by customer")]
    reason: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any TLS connection is opened.
    orderlink_ws::init_crypto();

    let args = Args::parse();

    orderlink_telemetry::init_logging()?;

    info!("Starting orderlink client v{}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(role) = args.role {
        config.identity.role = role;
    }
    if let Some(id) = args.id {
        config.identity.id = id;
    }
    info!(ws_url = %config.ws_url, api = %config.api_base_url, "Configuration loaded");

    let app = Application::new(config)?;

    match args.cancel {
        Some(order_id) => {
            let outcome = app
                .cancel_once(&OrderId::from(order_id), &args.reason)
                .await?;
            info!(%outcome, "Done");
            if !outcome.is_acked() {
                std::process::exit(2);
            }
        }
        None => app.run().await?,
    }

    Ok(())
}
