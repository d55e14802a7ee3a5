//! Tick forwarder.
//!
//! Each subscription handle returned to an HTTP client is drained by its own
//! task until the handle is revoked. Every batch reaches every forwarder.

use tokio::task::JoinHandle;

use crate::application::services::SubscriptionHandle;
use crate::infrastructure::metrics;

/// Spawn a task that drains `handle`, logging each batch.
pub fn spawn_forwarder(mut handle: SubscriptionHandle) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let id = handle.id();
        let class = handle.class();
        let mut forwarded = 0_u64;

        tracing::debug!(subscription_id = %id, class = %class, "Tick forwarder started");

        while let Some(batch) = handle.next_batch().await {
            forwarded += 1;
            metrics::record_batch_dispatched(class);
            tracing::info!(
                subscription_id = %id,
                class = %class,
                ticks = batch.len(),
                received_at = %batch.received_at,
                "Tick batch"
            );
            for tick in &batch.ticks {
                tracing::trace!(
                    subscription_id = %id,
                    instrument_token = tick.instrument_token,
                    mode = tick.mode.as_str(),
                    last_price = %tick.last_price,
                    "Tick"
                );
            }
        }

        tracing::debug!(subscription_id = %id, class = %class, forwarded, "Tick forwarder stopped");
        forwarded
    })
}
