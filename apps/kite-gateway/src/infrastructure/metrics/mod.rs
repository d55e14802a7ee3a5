//! Prometheus Metrics Module
//!
//! Exposes gateway metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Ticks**: batches and ticks received from the vendor feed, batches
//!   delivered to and skipped by subscriptions
//! - **Subscriptions**: registered members per class
//! - **Connection**: ticker connection state and reconnects
//! - **Errors**: upstream failures and authentication outcomes
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP port. Recording before
//! `init_metrics` is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::subscription::SubscriptionClass;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling it again returns the handle installed first.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "kite_gateway_tick_batches_received_total",
        "Tick frames received from the Kite ticker"
    );
    describe_counter!(
        "kite_gateway_ticks_received_total",
        "Individual ticks decoded from ticker frames"
    );
    describe_counter!(
        "kite_gateway_tick_batches_dispatched_total",
        "Tick batches delivered to subscription consumers"
    );
    describe_counter!(
        "kite_gateway_tick_batches_lagged_total",
        "Tick batches skipped by slow subscription consumers"
    );

    describe_gauge!(
        "kite_gateway_subscription_members",
        "Registered members per subscription class"
    );
    describe_gauge!(
        "kite_gateway_ticker_connected",
        "Whether the ticker WebSocket is connected (1) or not (0)"
    );

    describe_counter!(
        "kite_gateway_ticker_reconnects_total",
        "Ticker reconnection attempts"
    );
    describe_counter!(
        "kite_gateway_upstream_errors_total",
        "Failed vendor calls by operation"
    );
    describe_counter!(
        "kite_gateway_authentications_total",
        "Request token exchanges by outcome"
    );
    describe_counter!(
        "nse_listings_fetches_total",
        "Listing CSV fetches by outcome"
    );

    describe_histogram!(
        "kite_gateway_frame_decode_seconds",
        "Time to decode a ticker frame and publish it"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record one ticker frame and the ticks it carried.
pub fn record_tick_batch(ticks: usize) {
    counter!("kite_gateway_tick_batches_received_total").increment(1);
    counter!("kite_gateway_ticks_received_total").increment(ticks as u64);
}

/// Record a batch delivered to a subscription consumer.
pub fn record_batch_dispatched(class: SubscriptionClass) {
    counter!(
        "kite_gateway_tick_batches_dispatched_total",
        "class" => class.key()
    )
    .increment(1);
}

/// Record batches a lagging consumer skipped.
pub fn record_lagged_batches(class: SubscriptionClass, skipped: u64) {
    counter!(
        "kite_gateway_tick_batches_lagged_total",
        "class" => class.key()
    )
    .increment(skipped);
}

/// Update the registered member count of a class.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_members(class: SubscriptionClass, count: usize) {
    gauge!(
        "kite_gateway_subscription_members",
        "class" => class.key()
    )
    .set(count as f64);
}

/// Update the ticker connection state.
pub fn set_ticker_connected(connected: bool) {
    gauge!("kite_gateway_ticker_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record a ticker reconnection attempt.
pub fn record_reconnect() {
    counter!("kite_gateway_ticker_reconnects_total").increment(1);
}

/// Record a failed vendor call.
pub fn record_upstream_error(operation: &'static str) {
    counter!(
        "kite_gateway_upstream_errors_total",
        "operation" => operation
    )
    .increment(1);
}

/// Record a request token exchange.
pub fn record_authentication(success: bool) {
    counter!(
        "kite_gateway_authentications_total",
        "outcome" => outcome(success)
    )
    .increment(1);
}

/// Record a listing CSV fetch.
pub fn record_listing_fetch(success: bool) {
    counter!("nse_listings_fetches_total", "outcome" => outcome(success)).increment(1);
}

/// Record frame decode duration.
pub fn record_decode_duration(duration: Duration) {
    histogram!("kite_gateway_frame_decode_seconds").record(duration.as_secs_f64());
}

const fn outcome(success: bool) -> &'static str {
    if success { "success" } else { "failure" }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels() {
        assert_eq!(outcome(true), "success");
        assert_eq!(outcome(false), "failure");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_tick_batch(3);
        record_batch_dispatched(SubscriptionClass::Stocks);
        set_active_members(SubscriptionClass::MutualFunds, 2);
        record_upstream_error("feed_subscribe");
    }
}
