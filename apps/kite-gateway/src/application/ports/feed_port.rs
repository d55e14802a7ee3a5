//! Market Feed Port (Driven Port)
//!
//! Interface for the single real-time vendor connection. A connector binds
//! a feed to an access token and the process-wide tick sender; the feed
//! publishes every decoded frame to that sender.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::session::AccessToken;
use crate::domain::subscription::Member;
use crate::domain::tick::TickBatch;

/// Sending half of the tick broadcast channel.
pub type TickSender = broadcast::Sender<Arc<TickBatch>>;

/// Market feed error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FeedError {
    /// The feed was shut down and cannot be used again.
    #[error("Market feed is closed")]
    Closed,

    /// Members could not be mapped to vendor instruments.
    #[error("Failed to resolve instruments: {message}")]
    Resolve {
        /// Error details.
        message: String,
    },

    /// The subscription command could not be delivered.
    #[error("Market feed command failed: {message}")]
    Command {
        /// Error details.
        message: String,
    },
}

/// A live vendor tick connection.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Start streaming. Calling it again on a running feed is a no-op.
    async fn start(&self) -> Result<(), FeedError>;

    /// Add members to the upstream subscription.
    async fn subscribe(&self, members: &[Member]) -> Result<(), FeedError>;

    /// Drop members from the upstream subscription.
    async fn unsubscribe(&self, members: &[Member]) -> Result<(), FeedError>;

    /// Close the connection. The feed publishes nothing afterwards.
    async fn shutdown(&self);
}

/// Factory binding a feed to credentials.
pub trait FeedConnector: Send + Sync {
    /// Create an idle feed for `token` that publishes into `sender`.
    fn bind(&self, token: &AccessToken, sender: TickSender) -> Arc<dyn MarketFeed>;
}
