//! NSE Listings Binary
//!
//! Serves the NSE equity listing CSV as JSON.
//!
//! # Environment Variables
//!
//! - `HOST` / `PORT`: listener (default: 0.0.0.0:3001)
//! - `APP_ENV`: development | production (default: production)
//! - `LISTINGS_CSV_URL`: CSV source
//! - `LISTINGS_CACHE_TTL_SECS`: cache lifetime (default: 300)
//! - `CORS_ORIGINS`: comma-separated allowed origins (default: any)
//! - `RUST_LOG`: log filter (default: info)

use std::sync::Arc;

use anyhow::Context;
use kite_gateway::infrastructure::config::load_dotenv;
use kite_gateway::infrastructure::http::shutdown_on_signal;
use kite_gateway::{
    ListingScraper, ListingsConfig, ListingsState, init_metrics, init_telemetry, listings_router,
    serve,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider was already installed");
    }

    load_dotenv();
    let _telemetry_guard = init_telemetry("nse-listings");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = ListingsConfig::from_env();
    tracing::info!(
        environment = config.environment.as_str(),
        addr = %config.server.bind_addr(),
        csv_url = %config.csv_url,
        cache_ttl_secs = config.cache_ttl.as_secs(),
        "Starting NSE listings service"
    );

    let scraper = ListingScraper::new(&config).context("failed to build listing scraper")?;
    let app = listings_router(
        ListingsState {
            scraper: Arc::new(scraper),
            expose_details: config.environment.is_development(),
        },
        &config.server.cors_origins,
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    serve(app, &config.server.bind_addr(), shutdown)
        .await
        .context("listing server failed")?;

    tracing::info!("NSE listings service stopped");
    Ok(())
}
