pub mod cache;
pub mod http_source;
pub mod provider;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::SnapshotCache;
pub use http_source::HttpScoreSource;
pub use provider::{ScoreSource, UpstreamError};
pub use session::{SessionConfig, SessionHandle, SessionManager};

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Spawns a background task that periodically evicts cache entries older than
/// `evict_after`, so matches nobody watches anymore do not pile up.
///
/// Returns `None` when eviction is disabled (`evict_after` of zero).
pub fn start_cache_sweeper(cache: SnapshotCache, evict_after: Duration) -> Option<JoinHandle<()>> {
    if evict_after.is_zero() {
        info!("Cache eviction disabled");
        return None;
    }
    let period = (evict_after / 4).max(Duration::from_secs(1));

    Some(tokio::spawn(async move {
        info!(
            "Cache sweeper started (evict_after={:?}, interval={:?})",
            evict_after, period
        );
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            let removed = cache.sweep(evict_after).await;
            if removed > 0 {
                info!("Evicted {} idle match(es) from snapshot cache", removed);
            } else {
                debug!("Cache sweep: nothing to evict");
            }
        }
    }))
}
