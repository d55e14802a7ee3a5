//! Tick Broadcast Hub
//!
//! One tokio broadcast channel per process carries every decoded vendor
//! frame. The feed publishes each batch once; every subscription handle
//! holds a receiver and sees every batch in vendor order.
//!
//! Slow receivers are not waited for: once a receiver falls more than
//! `capacity` batches behind it observes `RecvError::Lagged` and skips
//! ahead.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::application::ports::TickSender;
use crate::domain::tick::TickBatch;

/// Default channel capacity, in batches.
pub const DEFAULT_TICK_CAPACITY: usize = 1024;

/// Central hub for the tick channel.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use kite_gateway::domain::tick::TickBatch;
/// use kite_gateway::infrastructure::broadcast::TickHub;
///
/// let hub = TickHub::new(16);
/// let mut rx = hub.subscribe();
///
/// assert_eq!(hub.publish(TickBatch::new(vec![])), Some(1));
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Debug)]
pub struct TickHub {
    tx: TickSender,
    capacity: usize,
}

impl TickHub {
    /// Create a hub with room for `capacity` batches per receiver.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            tx: broadcast::channel(capacity).0,
            capacity,
        }
    }

    /// Create a hub with the default capacity.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_TICK_CAPACITY)
    }

    /// Publish a batch to all receivers.
    ///
    /// Returns the number of receivers that got it, or `None` if nobody is
    /// listening.
    pub fn publish(&self, batch: TickBatch) -> Option<usize> {
        self.tx.send(Arc::new(batch)).ok()
    }

    /// Get a new receiver. It sees batches published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<TickBatch>> {
        self.tx.subscribe()
    }

    /// Sending half, handed to the vendor feed.
    #[must_use]
    pub fn sender(&self) -> TickSender {
        self.tx.clone()
    }

    /// Number of live receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for TickHub {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Shared hub reference.
pub type SharedTickHub = Arc<TickHub>;

// =============================================================================
// Tests
// =============================================================================
