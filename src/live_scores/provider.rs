use async_trait::async_trait;
use thiserror::Error;

use crate::models::{MatchId, ScoreSnapshot};

/// Why the score source could not produce a snapshot.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("upstream returned status {0}")]
    Status(u16),
    #[error("upstream rate limit hit")]
    RateLimited,
    #[error("match {0} not found upstream")]
    NotFound(String),
    #[error("failed to parse upstream response: {0}")]
    Parse(String),
    #[error("upstream timed out")]
    Timeout,
}

/// Trait that every score source must implement.
#[async_trait]
pub trait ScoreSource: Send + Sync {
    /// Fetch the current snapshot for one match.
    async fn fetch_snapshot(&self, match_id: &MatchId) -> Result<ScoreSnapshot, UpstreamError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
