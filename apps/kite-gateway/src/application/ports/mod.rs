//! Application Ports (Driven)
//!
//! Interfaces the gateway core uses to reach the vendor.
//! - `BrokerApi`: REST calls (token exchange, instruments, market data)
//! - `FeedConnector` / `MarketFeed`: the real-time tick connection

mod broker_port;
mod feed_port;

pub use broker_port::{
    BrokerApi, BrokerError, Candle, HistoricalQuery, Instrument, LastPrice, MfSip, SessionGrant,
};
pub use feed_port::{FeedConnector, FeedError, MarketFeed, TickSender};
