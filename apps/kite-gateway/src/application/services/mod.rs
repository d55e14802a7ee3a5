//! Application Services
//!
//! - `GatewayService`: session, subscription registry and tick dispatch
//! - `MarketPhase`: exchange trading session clock

mod gateway;
mod market_hours;

pub use gateway::{
    GatewayError, GatewayService, MARKET_INDEX, MarketStatus, SubscriptionHandle,
    SubscriptionRequest, UpstreamError,
};
pub use market_hours::{IST, MarketPhase};
