//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the HTTP surface.

/// Kite Connect REST client and Kite Ticker WebSocket feed.
pub mod kite;

/// NSE equity listing CSV scraper.
pub mod listings;

/// Tick broadcast hub.
pub mod broadcast;

/// Configuration from the environment.
pub mod config;

/// HTTP routers, error mapping and server runner.
pub mod http;

/// Health check and metrics endpoints.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
