use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Longest match identifier accepted from a subscriber.
pub const MAX_MATCH_ID_LEN: usize = 64;

/// Identifier of one match on the upstream score provider
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchId(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatchIdError {
    #[error("match ID is required")]
    Empty,
    #[error("match ID is longer than 64 characters")]
    TooLong,
    #[error("match ID may only contain letters, digits, '-' and '_'")]
    InvalidCharacter,
}

impl MatchId {
    /// Validate a raw path segment into a match identifier.
    pub fn parse(raw: &str) -> Result<Self, MatchIdError> {
        let id = raw.trim();
        if id.is_empty() {
            return Err(MatchIdError::Empty);
        }
        if id.len() > MAX_MATCH_ID_LEN {
            return Err(MatchIdError::TooLong);
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(MatchIdError::InvalidCharacter);
        }
        Ok(MatchId(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Match state as returned by the score source.
///
/// The feed never looks inside it: teams, innings and status are whatever the
/// source produced. Clones share the same underlying JSON document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ScoreSnapshot(Arc<serde_json::Value>);

impl ScoreSnapshot {
    pub fn new(value: serde_json::Value) -> Self {
        ScoreSnapshot(Arc::new(value))
    }

    #[cfg(test)]
    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }

    /// True when both handles point at the same stored document.
    #[cfg(test)]
    pub fn ptr_eq(&self, other: &ScoreSnapshot) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// One message on a subscriber's event stream.
///
/// Serialized as `{"type": "...", "data"?, "error"?, "stale"?, "timestamp"}`
/// with the timestamp in Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BroadcastEvent {
    Initial {
        data: ScoreSnapshot,
        /// Set when the upstream fetch failed and the last good snapshot was served
        #[serde(skip_serializing_if = "is_false")]
        stale: bool,
        timestamp: i64,
    },
    Update {
        data: ScoreSnapshot,
        #[serde(skip_serializing_if = "is_false")]
        stale: bool,
        timestamp: i64,
    },
    Error {
        error: String,
        timestamp: i64,
    },
    Heartbeat {
        timestamp: i64,
    },
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl BroadcastEvent {
    pub fn initial(data: ScoreSnapshot, stale: bool) -> Self {
        BroadcastEvent::Initial {
            data,
            stale,
            timestamp: now_millis(),
        }
    }

    pub fn update(data: ScoreSnapshot, stale: bool) -> Self {
        BroadcastEvent::Update {
            data,
            stale,
            timestamp: now_millis(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        BroadcastEvent::Error {
            error: message.into(),
            timestamp: now_millis(),
        }
    }

    pub fn heartbeat() -> Self {
        BroadcastEvent::Heartbeat {
            timestamp: now_millis(),
        }
    }

    /// Wire name of the event type.
    pub fn kind(&self) -> &'static str {
        match self {
            BroadcastEvent::Initial { .. } => "initial",
            BroadcastEvent::Update { .. } => "update",
            BroadcastEvent::Error { .. } => "error",
            BroadcastEvent::Heartbeat { .. } => "heartbeat",
        }
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> Option<&ScoreSnapshot> {
        match self {
            BroadcastEvent::Initial { data, .. } | BroadcastEvent::Update { data, .. } => {
                Some(data)
            }
            _ => None,
        }
    }
}
