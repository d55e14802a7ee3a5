//! Kite Gateway Binary
//!
//! Serves the brokerage HTTP API.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin kite-gateway
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `KITE_API_KEY`: Kite Connect app key
//! - `KITE_API_SECRET`: Kite Connect app secret
//!
//! ## Optional
//! - `HOST` / `PORT`: listener (default: 0.0.0.0:3000)
//! - `APP_ENV`: development | production (default: production)
//! - `REDIRECT_URL`: login redirect (default: `http://{HOST}:{PORT}/callback`)
//! - `FRONTEND_URL`: callback target (default: <http://localhost:5173>)
//! - `DEFAULT_EXCHANGE`: prefix for bare symbols (default: NSE)
//! - `CORS_ORIGINS`: comma-separated allowed origins (default: any)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: log filter (default: info)

use std::process::ExitCode;
use std::sync::Arc;

use kite_gateway::infrastructure::config::load_dotenv;
use kite_gateway::infrastructure::http::shutdown_on_signal;
use kite_gateway::{
    AppState, BrokerApi, GatewayConfig, GatewayService, KiteClient, KiteTickerConnector, TickHub,
    gateway_router, init_metrics, init_telemetry, serve,
};
use tokio_util::sync::CancellationToken;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> ExitCode {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider was already installed");
    }

    let dotenv = load_dotenv();
    let _telemetry_guard = init_telemetry("kite-gateway");
    if let Some(path) = dotenv {
        tracing::debug!(path = %path.display(), "Loaded .env");
    }

    tracing::info!(version = VERSION, "Starting Kite Gateway");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    log_config(&config);

    match run(config).await {
        Ok(()) => {
            tracing::info!("Kite Gateway stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Kite Gateway failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let broker: Arc<dyn BrokerApi> =
        Arc::new(KiteClient::new(&config.kite, config.credentials.clone())?);
    let connector = Arc::new(KiteTickerConnector::new(
        &config.kite.ticker_url,
        config.credentials.api_key(),
        config.ticker.clone(),
        Arc::clone(&broker),
    )?);
    let hub = Arc::new(TickHub::new(config.ticker.channel_capacity));

    let service = Arc::new(GatewayService::new(
        broker,
        connector,
        hub,
        config.default_exchange.clone(),
    ));

    let app = gateway_router(
        AppState {
            service: Arc::clone(&service),
            redirect_url: config.redirect_url.clone(),
            frontend_url: config.frontend_url.clone(),
            expose_details: config.environment.is_development(),
        },
        VERSION,
        &config.server.cors_origins,
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    let served = serve(app, &config.server.bind_addr(), shutdown.clone()).await;
    shutdown.cancel();
    service.shutdown().await;
    served?;
    Ok(())
}

fn log_config(config: &GatewayConfig) {
    tracing::info!(
        environment = config.environment.as_str(),
        addr = %config.server.bind_addr(),
        default_exchange = %config.default_exchange,
        redirect_url = %config.redirect_url,
        "Configuration loaded"
    );
    tracing::debug!(
        api_url = %config.kite.api_url,
        ticker_url = %config.kite.ticker_url,
        tick_channel_capacity = config.ticker.channel_capacity,
        "Kite endpoints"
    );
}
