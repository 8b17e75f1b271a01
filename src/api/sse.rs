//! Text event-stream framing for subscriber connections.

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
};
use std::convert::Infallible;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::live_scores::SessionHandle;
use crate::models::BroadcastEvent;

/// Encode one event as `data: <json>\n\n`.
pub fn frame(event: &BroadcastEvent) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_string(event)?;
    Ok(Bytes::from(format!("data: {}\n\n", json)))
}

/// Turn a session's event receiver into a streaming HTTP response.
///
/// The body owns the session handle: when the client disconnects the body is
/// dropped, which cancels the session.
pub fn event_stream(handle: SessionHandle, rx: mpsc::Receiver<BroadcastEvent>) -> Response {
    let stream = futures_util::stream::unfold((handle, rx), |(handle, mut rx)| async move {
        loop {
            let Some(event) = rx.recv().await else {
                debug!(
                    "Event stream for match {} finished (session {:?})",
                    handle.match_id(),
                    handle.state()
                );
                return None;
            };
            match frame(&event) {
                Ok(bytes) => return Some((Ok::<_, Infallible>(bytes), (handle, rx))),
                Err(e) => error!(
                    "Dropping unserializable {} event for match {}: {}",
                    event.kind(),
                    handle.match_id(),
                    e
                ),
            }
        }
    });

    let mut response = Body::from_stream(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live_scores::testing::ScriptedSource;
    use crate::live_scores::{SessionConfig, SessionManager, SnapshotCache};
    use crate::models::{MatchId, ScoreSnapshot};
    use http_body_util::BodyExt;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::watch;

    #[test]
    fn test_frame_format() {
        let ev = BroadcastEvent::Heartbeat {
            timestamp: 1_700_000_000_123,
        };
        let bytes = frame(&ev).unwrap();
        assert_eq!(
            &bytes[..],
            b"data: {\"type\":\"heartbeat\",\"timestamp\":1700000000123}\n\n"
        );
    }

    #[test]
    fn test_frame_is_single_line() {
        let snap = ScoreSnapshot::new(json!({"commentary": "FOUR!\nThrough the covers"}));
        let bytes = frame(&BroadcastEvent::update(snap, false)).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.starts_with("data: {"));
        assert!(text.ends_with("}\n\n"));
        assert_eq!(text.matches('\n').count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_stream_headers_and_frames() {
        let source = ScriptedSource::new(vec![Ok(json!({"score": "201/6"}))]);
        let cache = SnapshotCache::new(source, Duration::from_secs(5));
        let (_shutdown, shutdown_rx) = watch::channel(false);
        let manager = SessionManager::new(
            cache,
            SessionConfig {
                poll_interval: Duration::from_secs(10),
                heartbeat_interval: Duration::from_secs(30),
                buffer: 8,
            },
            shutdown_rx,
        );
        let (handle, rx) = manager.open(MatchId::parse("m1").unwrap());

        let response = event_stream(handle, rx);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(headers[header::CONNECTION], "keep-alive");
        assert_eq!(headers["x-accel-buffering"], "no");

        let mut body = response.into_body();
        let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
        let text = std::str::from_utf8(&first).unwrap();
        let payload: serde_json::Value =
            serde_json::from_str(text.strip_prefix("data: ").unwrap().trim_end()).unwrap();
        assert_eq!(payload["type"], "initial");
        assert_eq!(payload["data"]["score"], "201/6");

        // Script is used up, so the t=10 poll falls back to the cached snapshot
        let second = body.frame().await.unwrap().unwrap().into_data().unwrap();
        let text = std::str::from_utf8(&second).unwrap();
        let payload: serde_json::Value =
            serde_json::from_str(text.strip_prefix("data: ").unwrap().trim_end()).unwrap();
        assert_eq!(payload["type"], "update");
        assert_eq!(payload["stale"], true);
        assert_eq!(payload["data"]["score"], "201/6");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_body_cancels_session() {
        let source = ScriptedSource::new(vec![Ok(json!({}))]);
        let cache = SnapshotCache::new(source, Duration::from_secs(5));
        let (_shutdown, shutdown_rx) = watch::channel(false);
        let manager = SessionManager::new(
            cache,
            SessionConfig {
                poll_interval: Duration::from_secs(10),
                heartbeat_interval: Duration::from_secs(30),
                buffer: 8,
            },
            shutdown_rx,
        );
        let (handle, rx) = manager.open(MatchId::parse("m1").unwrap());
        assert_eq!(manager.active_sessions(), 1);

        drop(event_stream(handle, rx));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.active_sessions(), 0);
    }
}
