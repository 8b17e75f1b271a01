use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

use crate::live_scores::SessionConfig;

/// Live cricket score feed
#[derive(Parser, Debug, Clone)]
#[command(name = "cricket-live-feed", version, about)]
pub struct Config {
    /// HTTP listen address
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// Base URL of the scraper; snapshots are fetched from `<url>/<match_id>`
    #[arg(
        long,
        env = "UPSTREAM_URL",
        default_value = "http://127.0.0.1:9000/score"
    )]
    pub upstream_url: String,

    /// Timeout for a single upstream request in seconds
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value = "8")]
    pub upstream_timeout_secs: u64,

    /// Seconds between score polls for each subscriber
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value = "10")]
    pub poll_interval_secs: u64,

    /// Seconds between keep-alive heartbeat events
    #[arg(long, env = "HEARTBEAT_INTERVAL_SECS", default_value = "30")]
    pub heartbeat_interval_secs: u64,

    /// How long a fetched snapshot is reused before refetching, in seconds
    #[arg(long, env = "CACHE_TTL_SECS", default_value = "5")]
    pub cache_ttl_secs: u64,

    /// Evict cached matches not refreshed for this many seconds (0 = never)
    #[arg(long, env = "CACHE_EVICT_AFTER_SECS", default_value = "3600")]
    pub cache_evict_after_secs: u64,

    /// Events buffered per subscriber
    #[arg(long, env = "SESSION_BUFFER", default_value = "32")]
    pub session_buffer: usize,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            anyhow::bail!("listen_addr '{}' is not a valid socket address", self.listen_addr);
        }
        let upstream = Url::parse(&self.upstream_url)
            .map_err(|e| anyhow::anyhow!("upstream_url '{}' is invalid: {}", self.upstream_url, e))?;
        if !matches!(upstream.scheme(), "http" | "https") {
            anyhow::bail!("upstream_url must use http or https");
        }
        if self.upstream_timeout_secs == 0 {
            anyhow::bail!("upstream_timeout_secs must be positive");
        }
        if self.poll_interval_secs == 0 || self.heartbeat_interval_secs == 0 {
            anyhow::bail!("poll and heartbeat intervals must be positive");
        }
        // A fetch still running at the next tick makes the session skip that poll
        if self.upstream_timeout_secs >= self.poll_interval_secs {
            anyhow::bail!(
                "upstream_timeout_secs ({}) must be less than poll_interval_secs ({})",
                self.upstream_timeout_secs,
                self.poll_interval_secs
            );
        }
        if self.cache_ttl_secs == 0 {
            anyhow::bail!("cache_ttl_secs must be positive");
        }
        // Each poll tick must see an expired entry, otherwise a subscriber
        // would get the same snapshot twice in a row
        if self.cache_ttl_secs >= self.poll_interval_secs {
            anyhow::bail!(
                "cache_ttl_secs ({}) must be less than poll_interval_secs ({})",
                self.cache_ttl_secs,
                self.poll_interval_secs
            );
        }
        if self.cache_evict_after_secs != 0 && self.cache_evict_after_secs < self.cache_ttl_secs {
            anyhow::bail!("cache_evict_after_secs must be 0 or at least cache_ttl_secs");
        }
        if self.session_buffer == 0 {
            anyhow::bail!("session_buffer must be positive");
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn cache_evict_after(&self) -> Duration {
        Duration::from_secs(self.cache_evict_after_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            buffer: self.session_buffer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["cricket-live-feed"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = parse(&[]);
        config.validate().unwrap();
        let session = config.session_config();
        assert_eq!(session.poll_interval, Duration::from_secs(10));
        assert_eq!(session.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.cache_ttl(), Duration::from_secs(5));
    }

    #[test]
    fn test_ttl_must_be_below_poll_interval() {
        let config = parse(&["--cache-ttl-secs", "10", "--poll-interval-secs", "10"]);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("must be less than"), "{}", err);
    }

    #[test]
    fn test_upstream_timeout_must_be_below_poll_interval() {
        let config = parse(&["--upstream-timeout-secs", "10", "--poll-interval-secs", "10"]);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("upstream_timeout_secs"), "{}", err);
        parse(&["--upstream-timeout-secs", "9"]).validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_upstream_url() {
        assert!(parse(&["--upstream-url", "ftp://scraper/score"]).validate().is_err());
        assert!(parse(&["--upstream-url", "::nope"]).validate().is_err());
    }

    #[test]
    fn test_rejects_zero_intervals() {
        assert!(parse(&["--heartbeat-interval-secs", "0"]).validate().is_err());
        assert!(parse(&["--session-buffer", "0"]).validate().is_err());
        assert!(parse(&["--cache-evict-after-secs", "2"]).validate().is_err());
        parse(&["--cache-evict-after-secs", "0"]).validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_listen_addr() {
        assert!(parse(&["--listen-addr", "localhost"]).validate().is_err());
    }
}
