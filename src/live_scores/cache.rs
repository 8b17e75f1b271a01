//! Short-lived snapshot cache shared by every subscriber session.
//!
//! Sessions never call the score source directly. They go through
//! [`SnapshotCache::get`], which serves an entry younger than the TTL as-is,
//! refreshes older ones, and falls back to the last good snapshot when the
//! refresh fails.
//!
//! Each match has its own slot guarded by an async mutex that is held across
//! the upstream call, so concurrent misses for one match share a single fetch
//! while different matches never wait on each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::provider::{ScoreSource, UpstreamError};
use crate::models::{MatchId, ScoreSnapshot};

struct CacheEntry {
    snapshot: ScoreSnapshot,
    fetched_at: Instant,
}

type Slot = Arc<Mutex<Option<CacheEntry>>>;

/// Result of a cache lookup.
#[derive(Debug, Clone)]
pub struct CachedSnapshot {
    pub snapshot: ScoreSnapshot,
    /// When the snapshot was obtained from the source
    pub fetched_at: Instant,
    /// The refresh failed and this is the last known good snapshot
    pub stale: bool,
}

/// Thread-safe, in-memory snapshot cache keyed by match ID.
#[derive(Clone)]
pub struct SnapshotCache {
    source: Arc<dyn ScoreSource>,
    ttl: Duration,
    slots: Arc<RwLock<HashMap<MatchId, Slot>>>,
}

impl SnapshotCache {
    pub fn new(source: Arc<dyn ScoreSource>, ttl: Duration) -> Self {
        SnapshotCache {
            source,
            ttl,
            slots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn slot(&self, match_id: &MatchId) -> Slot {
        if let Some(slot) = self.slots.read().await.get(match_id) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(match_id.clone()).or_default())
    }

    /// Return the snapshot for `match_id`, fetching from the source when the
    /// cached one is missing or older than the TTL.
    ///
    /// Fails only when the source fails and nothing was ever cached for the
    /// match.
    pub async fn get(&self, match_id: &MatchId) -> Result<CachedSnapshot, UpstreamError> {
        let slot = self.slot(match_id).await;
        let mut entry = slot.lock().await;

        if let Some(cached) = entry.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                debug!("Cache hit for match {}", match_id);
                return Ok(CachedSnapshot {
                    snapshot: cached.snapshot.clone(),
                    fetched_at: cached.fetched_at,
                    stale: false,
                });
            }
        }

        match self.source.fetch_snapshot(match_id).await {
            Ok(snapshot) => {
                let fetched_at = Instant::now();
                *entry = Some(CacheEntry {
                    snapshot: snapshot.clone(),
                    fetched_at,
                });
                Ok(CachedSnapshot {
                    snapshot,
                    fetched_at,
                    stale: false,
                })
            }
            Err(err) => match entry.as_ref() {
                Some(cached) => {
                    warn!(
                        "{} failed for match {} ({}); serving snapshot from {:?} ago",
                        self.source.name(),
                        match_id,
                        err,
                        cached.fetched_at.elapsed()
                    );
                    Ok(CachedSnapshot {
                        snapshot: cached.snapshot.clone(),
                        fetched_at: cached.fetched_at,
                        stale: true,
                    })
                }
                None => Err(err),
            },
        }
    }

    /// Drop entries older than `max_age` and slots that never got a snapshot.
    /// Slots currently in use by a caller are left alone.
    ///
    /// Returns the number of slots removed.
    pub async fn sweep(&self, max_age: Duration) -> usize {
        let mut slots = self.slots.write().await;
        let before = slots.len();
        slots.retain(|_, slot| {
            // Clones only happen under the map lock, so this is exact here
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(entry) => entry
                    .as_ref()
                    .is_some_and(|e| e.fetched_at.elapsed() <= max_age),
                Err(_) => true,
            }
        });
        before - slots.len()
    }

    /// Number of matches with a cached snapshot. Slots mid-fetch are counted.
    pub async fn len(&self) -> usize {
        let slots = self.slots.read().await;
        slots
            .values()
            .filter(|slot| slot.try_lock().map(|e| e.is_some()).unwrap_or(true))
            .count()
    }
}
