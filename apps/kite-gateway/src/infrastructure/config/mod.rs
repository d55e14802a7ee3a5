//! Configuration Module
//!
//! Configuration loading for the gateway and the listing service.

mod settings;

pub use settings::{
    ConfigError, Credentials, DEFAULT_KITE_API_URL, DEFAULT_KITE_LOGIN_URL,
    DEFAULT_KITE_TICKER_URL, DEFAULT_LISTINGS_CSV_URL, Environment, GatewayConfig, KiteSettings,
    ListingsConfig, ServerSettings, TickerSettings, load_dotenv,
};
