#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Kite Gateway - Brokerage API Gateway
//!
//! An HTTP gateway in front of the Kite Connect API. It holds the broker
//! session, keeps a registry of real-time tick subscriptions served by a
//! single Kite Ticker connection, and proxies instrument and market data
//! lookups. A second binary serves the NSE equity listing CSV as JSON.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: session, subscription registry, tick types
//! - **Application**: broker and feed ports, `GatewayService`
//! - **Infrastructure**: Kite REST and ticker adapters, tick hub, listing
//!   scraper, HTTP routers, config, metrics, telemetry
//!
//! # Data Flow
//!
//! ```text
//!                                    ┌──────────────┐
//! Kite Ticker WS ──► KiteTicker ───► │   TickHub    │ ──► handle (stocks)
//!                        ▲           │ (broadcast)  │ ──► handle (mutualFunds)
//!                        │           └──────────────┘
//!   subscribe/unsubscribe│
//!                        │
//! HTTP ──► GatewayService ──► SessionStore / SubscriptionRegistry
//!                │
//!                └──► KiteClient ──► Kite Connect REST
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - session, subscriptions and ticks.
pub mod domain;

/// Application layer - ports and the gateway service.
pub mod application;

/// Infrastructure layer - adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::session::{AccessToken, Session, SessionSummary};
pub use domain::subscription::{
    Member, MemberError, SubscriptionClass, SubscriptionEntry, SubscriptionStats,
};
pub use domain::tick::{Tick, TickBatch, TickMode};

// Application
pub use application::ports::{
    BrokerApi, BrokerError, FeedConnector, FeedError, MarketFeed, TickSender,
};
pub use application::services::{
    GatewayError, GatewayService, MarketPhase, SubscriptionHandle, SubscriptionRequest,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, Credentials, Environment, GatewayConfig, KiteSettings, ListingsConfig,
    ServerSettings, TickerSettings,
};

// Adapters
pub use infrastructure::broadcast::{SharedTickHub, TickHub};
pub use infrastructure::kite::{KiteClient, KiteTicker, KiteTickerConnector};
pub use infrastructure::listings::{Listing, ListingError, ListingScraper};

// HTTP
pub use infrastructure::http::{
    ApiError, AppState, ListingsState, ServerError, gateway_router, listings_router, serve,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
