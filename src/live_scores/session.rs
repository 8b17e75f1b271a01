//! Per-subscriber broadcast sessions.
//!
//! Every open event stream is backed by one spawned task:
//!
//! ```text
//!  open() ──▶ Starting ── cache.get ──▶ initial | error
//!                │
//!                ▼
//!            Streaming ── poll tick ──────▶ update | error
//!                │     ── heartbeat tick ─▶ heartbeat
//!                ▼
//!             Closed   (cancel, subscriber gone, server shutdown)
//! ```
//!
//! Fetch failures are reported in-band and never end a session. A poll fetch
//! runs alongside the heartbeat timer, so a slow upstream never delays a
//! heartbeat, and at most one fetch per session is in flight.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::cache::{CachedSnapshot, SnapshotCache};
use super::provider::UpstreamError;
use crate::models::{BroadcastEvent, MatchId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Streaming,
    Closed,
}

/// Timer and buffer settings shared by all sessions.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Events buffered per subscriber before the session waits on the client
    pub buffer: usize,
}

/// Owner side of a running session. Dropping it cancels the session.
pub struct SessionHandle {
    match_id: MatchId,
    cancel: watch::Sender<bool>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn match_id(&self) -> &MatchId {
        &self.match_id
    }

    /// Stop both timers and close the stream. Safe to call any number of times.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Wait until the session task has finished.
    #[cfg(test)]
    pub async fn closed(&mut self) {
        // An error means the task is gone, which is also closed
        let _ = self
            .state
            .wait_for(|s| *s == SessionState::Closed)
            .await
            .map(|_| ());
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Spawns sessions and keeps count of the live ones.
#[derive(Clone)]
pub struct SessionManager {
    cache: SnapshotCache,
    config: SessionConfig,
    shutdown: watch::Receiver<bool>,
    active: Arc<AtomicUsize>,
}

impl SessionManager {
    pub fn new(cache: SnapshotCache, config: SessionConfig, shutdown: watch::Receiver<bool>) -> Self {
        SessionManager {
            cache,
            config,
            shutdown,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Start a session for `match_id`. Events arrive on the returned receiver
    /// until the session closes, at which point the receiver yields `None`.
    pub fn open(&self, match_id: MatchId) -> (SessionHandle, mpsc::Receiver<BroadcastEvent>) {
        let (tx, rx) = mpsc::channel(self.config.buffer.max(1));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(SessionState::Starting);

        self.active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(Arc::clone(&self.active));

        let session = Session {
            match_id: match_id.clone(),
            cache: self.cache.clone(),
            config: self.config,
            stop: StopSignal {
                cancel: cancel_rx,
                shutdown: self.shutdown.clone(),
            },
            state: state_tx,
            sink: EventSink::new(tx),
        };
        tokio::spawn(async move {
            let _guard = guard;
            session.run().await;
        });

        let handle = SessionHandle {
            match_id,
            cancel: cancel_tx,
            state: state_rx,
        };
        (handle, rx)
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fires on explicit cancellation or server shutdown.
struct StopSignal {
    cancel: watch::Receiver<bool>,
    shutdown: watch::Receiver<bool>,
}

impl StopSignal {
    async fn triggered(&mut self) {
        let StopSignal { cancel, shutdown } = self;
        tokio::select! {
            // Sender dropped means the handle is gone
            _ = async { let _ = cancel.wait_for(|c| *c).await.map(|_| ()); } => {}
            _ = async {
                let sender_gone = shutdown.wait_for(|s| *s).await.map(|_| ()).is_err();
                if sender_gone {
                    std::future::pending::<()>().await;
                }
            } => {}
        }
    }
}

/// Write side of a subscriber stream. After the first failed send every
/// further emit is a no-op.
pub struct EventSink {
    tx: Option<mpsc::Sender<BroadcastEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<BroadcastEvent>) -> Self {
        EventSink { tx: Some(tx) }
    }

    pub fn is_open(&self) -> bool {
        self.tx.is_some()
    }

    /// Returns false if the event was not delivered.
    pub async fn emit(&mut self, event: BroadcastEvent) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        if tx.send(event).await.is_err() {
            debug!("Subscriber gone, dropping further events");
            self.tx = None;
            return false;
        }
        true
    }

    /// Resolves once the subscriber has dropped its receiver.
    pub async fn closed(&self) {
        if let Some(tx) = &self.tx {
            tx.closed().await;
        }
    }

    pub fn close(&mut self) {
        self.tx = None;
    }
}

type PendingFetch = BoxFuture<'static, Result<CachedSnapshot, UpstreamError>>;

/// Resolves with the outcome of the in-flight fetch, or never if there is none.
async fn in_flight(fetch: &mut Option<PendingFetch>) -> Result<CachedSnapshot, UpstreamError> {
    match fetch {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

struct Session {
    match_id: MatchId,
    cache: SnapshotCache,
    config: SessionConfig,
    stop: StopSignal,
    state: watch::Sender<SessionState>,
    sink: EventSink,
}

impl Session {
    async fn run(mut self) {
        info!("Session opened for match {}", self.match_id);
        self.stream().await;
        self.sink.close();
        self.state.send_replace(SessionState::Closed);
        info!("Session closed for match {}", self.match_id);
    }

    async fn stream(&mut self) {
        let first = tokio::select! {
            biased;
            _ = self.stop.triggered() => return,
            res = self.cache.get(&self.match_id) => res,
        };
        let event = match first {
            Ok(cached) => BroadcastEvent::initial(cached.snapshot, cached.stale),
            Err(err) => self.fetch_error(err),
        };
        if !self.send(event).await {
            return;
        }
        self.state.send_replace(SessionState::Streaming);

        let start = Instant::now();
        let mut poll = interval_at(start + self.config.poll_interval, self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut heartbeat = interval_at(
            start + self.config.heartbeat_interval,
            self.config.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut fetch: Option<PendingFetch> = None;

        while self.sink.is_open() {
            tokio::select! {
                biased;
                _ = self.stop.triggered() => break,
                _ = self.sink.closed() => break,
                _ = heartbeat.tick() => {
                    self.send(BroadcastEvent::heartbeat()).await;
                }
                res = in_flight(&mut fetch) => {
                    fetch = None;
                    let event = match res {
                        Ok(cached) => self.update(cached),
                        Err(err) => self.fetch_error(err),
                    };
                    self.send(event).await;
                }
                _ = poll.tick() => {
                    if fetch.is_some() {
                        debug!("Previous fetch for match {} still running, skipping poll", self.match_id);
                        continue;
                    }
                    let cache = self.cache.clone();
                    let match_id = self.match_id.clone();
                    fetch = Some(Box::pin(async move { cache.get(&match_id).await }));
                }
            }
        }
    }

    /// Deliver one event, giving up as soon as the session is told to stop.
    /// Returns false if the event was not delivered.
    async fn send(&mut self, event: BroadcastEvent) -> bool {
        tokio::select! {
            biased;
            _ = self.stop.triggered() => {
                self.sink.close();
                false
            }
            delivered = self.sink.emit(event) => delivered,
        }
    }

    fn update(&self, cached: CachedSnapshot) -> BroadcastEvent {
        BroadcastEvent::update(cached.snapshot, cached.stale)
    }

    fn fetch_error(&self, err: UpstreamError) -> BroadcastEvent {
        warn!("Score fetch failed for match {}: {}", self.match_id, err);
        BroadcastEvent::error(format!("Failed to fetch score: {}", err))
    }
}
