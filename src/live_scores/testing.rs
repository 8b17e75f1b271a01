use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::provider::{ScoreSource, UpstreamError};
use crate::models::{MatchId, ScoreSnapshot};

/// Score source that replays a fixed list of outcomes, one per call.
/// Once the list is used up every call fails with a transport error.
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<serde_json::Value, UpstreamError>>>,
    calls: AtomicUsize,
    delay: Duration,
}

impl ScriptedSource {
    pub fn new(script: Vec<Result<serde_json::Value, UpstreamError>>) -> Arc<Self> {
        Self::with_delay(script, Duration::ZERO)
    }

    pub fn with_delay(
        script: Vec<Result<serde_json::Value, UpstreamError>>,
        delay: Duration,
    ) -> Arc<Self> {
        Arc::new(ScriptedSource {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScoreSource for ScriptedSource {
    fn name(&self) -> &str {
        "ScriptedSource"
    }

    async fn fetch_snapshot(&self, _match_id: &MatchId) -> Result<ScoreSnapshot, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(value)) => Ok(ScoreSnapshot::new(value)),
            Some(Err(err)) => Err(err),
            None => Err(UpstreamError::Transport("script exhausted".to_string())),
        }
    }
}
