//! Kite Connect Adapters
//!
//! - `client`: REST API (`BrokerApi`)
//! - `ticker`: WebSocket tick feed (`MarketFeed` / `FeedConnector`)
//! - `codec`: binary frame splitting and ticker commands
//! - `reconnect`: backoff for the ticker connection

pub mod client;
pub mod codec;
pub mod reconnect;
pub mod ticker;

pub use client::KiteClient;
pub use ticker::{KiteTicker, KiteTickerConnector, TickerError};
