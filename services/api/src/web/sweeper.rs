//! services/api/src/web/sweeper.rs
//!
//! The background task that expires abandoned checkouts.

use chrono::Utc;
use guide_access_core::TransactionBroker;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Periodically moves pending transactions past their deadline to `expired`.
///
/// Runs until `cancellation_token` is cancelled. A failed sweep is logged and
/// retried on the next tick.
pub async fn expiry_sweeper(
    broker: Arc<TransactionBroker>,
    interval: Duration,
    cancellation_token: CancellationToken,
) {
    info!(interval_secs = interval.as_secs(), "Checkout expiry sweeper started.");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                info!("Checkout expiry sweeper cancelled.");
                return;
            }
            _ = ticker.tick() => {
                if let Err(e) = broker.expire_stale(Utc::now()).await {
                    error!("Checkout expiry sweep failed: {}", e);
                }
            }
        }
    }
}
