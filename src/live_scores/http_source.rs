use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::provider::{ScoreSource, UpstreamError};
use crate::models::{MatchId, ScoreSnapshot};

/// Score source backed by a scraper service that serves one JSON document per
/// match at `{base_url}/{match_id}`.
pub struct HttpScoreSource {
    http: Client,
    base_url: Url,
}

impl HttpScoreSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid upstream URL '{}'", base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Upstream URL '{}' cannot be used as a base", base_url);
        }
        Ok(HttpScoreSource { http, base_url })
    }

    fn match_url(&self, match_id: &MatchId) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(match_id.as_str());
        }
        url
    }
}

fn status_error(status: StatusCode, match_id: &MatchId) -> UpstreamError {
    match status {
        StatusCode::NOT_FOUND => UpstreamError::NotFound(match_id.to_string()),
        StatusCode::TOO_MANY_REQUESTS => UpstreamError::RateLimited,
        other => UpstreamError::Status(other.as_u16()),
    }
}

#[async_trait]
impl ScoreSource for HttpScoreSource {
    fn name(&self) -> &str {
        "HttpScoreSource"
    }

    async fn fetch_snapshot(&self, match_id: &MatchId) -> Result<ScoreSnapshot, UpstreamError> {
        let url = self.match_url(match_id);
        debug!("Fetching snapshot from {}", url);

        let resp = self.http.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout
            } else {
                UpstreamError::Transport(e.to_string())
            }
        })?;

        if !resp.status().is_success() {
            return Err(status_error(resp.status(), match_id));
        }

        let raw: serde_json::Value = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout
            } else {
                UpstreamError::Parse(e.to_string())
            }
        })?;

        if raw.is_null() {
            return Err(UpstreamError::Parse("empty snapshot".to_string()));
        }

        Ok(ScoreSnapshot::new(raw))
    }
}
