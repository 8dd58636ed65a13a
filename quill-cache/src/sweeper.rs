//! Background purge of expired cache entries.
//!
//! Lazy expiry only removes entries that are looked up again. Results that
//! are never re-read would otherwise sit in memory until capacity eviction
//! reaches them, so the sweeper purges them on a fixed period.
//!
//! The task holds only a `Weak` reference and stops by itself once the cache
//! is dropped, or when the shutdown channel flips to `true` (or its sender
//! goes away).

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::engine::QueryCache;

/// Spawn the sweep loop on the current tokio runtime.
///
/// The returned handle resolves to the total number of entries purged.
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = spawn_sweeper(&cache, Duration::from_secs(60), shutdown_rx);
///
/// // Later, trigger shutdown
/// let _ = shutdown_tx.send(true);
/// let purged = handle.await?;
/// ```
pub fn spawn_sweeper(
    cache: &Arc<QueryCache>,
    period: Duration,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<u64> {
    tokio::spawn(sweep_task(Arc::downgrade(cache), period, shutdown_rx))
}

/// The sweep loop itself.
pub async fn sweep_task(
    cache: Weak<QueryCache>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> u64 {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(interval_secs = period.as_secs(), "Cache sweeper started");

    let mut total: u64 = 0;
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Cache sweeper shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                let Some(cache) = cache.upgrade() else {
                    tracing::info!("Cache dropped, sweeper exiting");
                    break;
                };
                let purged = cache.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, remaining = cache.len(), "Swept expired cache entries");
                }
                total += purged as u64;
            }
        }
    }

    tracing::info!(total_purged = total, "Cache sweeper completed");
    total
}
