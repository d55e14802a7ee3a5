//! Tick Types
//!
//! Ticks are produced by the feed codec and routed to subscribers without
//! being interpreted. The fields carried here are the ones the vendor
//! packet header gives for free; nothing downstream filters on them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Packet mode reported by the vendor, derived from the packet length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TickMode {
    /// Last traded price only.
    Ltp,
    /// Price, volume and OHLC.
    Quote,
    /// Quote plus market depth.
    Full,
}

impl TickMode {
    /// Get the mode name used by the vendor protocol.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ltp => "ltp",
            Self::Quote => "quote",
            Self::Full => "full",
        }
    }
}

/// A single market data update for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tick {
    /// Vendor instrument token.
    pub instrument_token: u32,
    /// Packet mode.
    pub mode: TickMode,
    /// Last traded price.
    pub last_price: Decimal,
}

/// All ticks decoded from one vendor frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickBatch {
    /// Ticks in the order the vendor sent them.
    pub ticks: Vec<Tick>,
    /// When the frame was received.
    pub received_at: DateTime<Utc>,
}

impl TickBatch {
    /// Create a batch stamped with the current time.
    #[must_use]
    pub fn new(ticks: Vec<Tick>) -> Self {
        Self {
            ticks,
            received_at: Utc::now(),
        }
    }

    /// Number of ticks in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    /// Whether the batch carries no ticks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_serializes_as_vendor_name() {
        for mode in [TickMode::Ltp, TickMode::Quote, TickMode::Full] {
            assert_eq!(
                serde_json::to_string(&mode).unwrap(),
                format!("\"{}\"", mode.as_str())
            );
        }
    }

    #[test]
    fn empty_batch() {
        let batch = TickBatch::new(Vec::new());
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
    }
}
