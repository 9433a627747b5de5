//! Throttled Publisher.
//!
//! Per-stream rate limiting with coalescing:
//! ```text
//!  publish ─► now - last ≥ interval ? ── yes ──► write now
//!                    │
//!                    no ──► keep latest payload, one timer at last + interval
//!                                        │
//!                                        └─► write latest pending
//! ```
//!
//! [`ThrottleState`] is the sans-IO decision; [`ThrottledPublisher`] drives
//! it with tokio timers and a single ordered writer task, so writes for the
//! same path reach the channel in the order they were decided.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::channel::{ChannelPath, EphemeralChannel, EphemeralValue, StreamKind};
use crate::clock::Clock;
use crate::storage::lock;

/// Whether the client window is in front of the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Foreground,
    Background,
}

/// Minimum spacing between writes per stream, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub cursor_ms: u64,
    pub drag_ms: u64,
    pub selection_ms: u64,
    pub presence_ms: u64,
    /// Floor applied to every stream while in the background
    pub background_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            cursor_ms: 33,
            drag_ms: 33,
            selection_ms: 100,
            presence_ms: 1000,
            background_ms: 500,
        }
    }
}

impl ThrottleConfig {
    pub fn for_testing() -> Self {
        Self {
            cursor_ms: 10,
            drag_ms: 10,
            selection_ms: 20,
            presence_ms: 50,
            background_ms: 40,
        }
    }

    pub fn interval(&self, kind: StreamKind, visibility: Visibility) -> u64 {
        let foreground = match kind {
            StreamKind::Cursors => self.cursor_ms,
            StreamKind::Drags => self.drag_ms,
            StreamKind::Selections => self.selection_ms,
            StreamKind::Presence => self.presence_ms,
        };
        match visibility {
            Visibility::Foreground => foreground,
            Visibility::Background => foreground.max(self.background_ms),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Sans-IO state
// ───────────────────────────────────────────────────────────────────

/// Outcome of offering a payload to a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Offer<P> {
    /// Write this payload now.
    Write(P),
    /// Payload parked; arm exactly one timer for `at`.
    Scheduled { at: u64 },
    /// Payload replaced an already scheduled one.
    Coalesced,
}

#[derive(Debug, Clone)]
pub struct ThrottleState<P> {
    last_flush_at: Option<u64>,
    pending: Option<P>,
    scheduled_at: Option<u64>,
}

impl<P> Default for ThrottleState<P> {
    fn default() -> Self {
        Self {
            last_flush_at: None,
            pending: None,
            scheduled_at: None,
        }
    }
}

impl<P> ThrottleState<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(&mut self, payload: P, now: u64, interval: u64) -> Offer<P> {
        match self.last_flush_at {
            Some(last) if now.saturating_sub(last) < interval => {
                self.pending = Some(payload);
                match self.scheduled_at {
                    Some(_) => Offer::Coalesced,
                    None => {
                        let at = last + interval;
                        self.scheduled_at = Some(at);
                        Offer::Scheduled { at }
                    }
                }
            }
            _ => {
                self.last_flush_at = Some(now);
                self.pending = None;
                self.scheduled_at = None;
                Offer::Write(payload)
            }
        }
    }

    /// Flush the scheduled payload, treating the scheduled time as the
    /// flush time. Called by the timer.
    pub fn fire(&mut self) -> Option<P> {
        let at = self.scheduled_at.take()?;
        let payload = self.pending.take()?;
        self.last_flush_at = Some(at);
        Some(payload)
    }

    /// Flush the scheduled payload if its slot has arrived.
    pub fn take_due(&mut self, now: u64) -> Option<P> {
        match self.scheduled_at {
            Some(at) if now >= at => self.fire(),
            _ => None,
        }
    }

    /// Drop any unflushed payload without writing it.
    pub fn cancel(&mut self) {
        self.pending = None;
        self.scheduled_at = None;
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn scheduled_at(&self) -> Option<u64> {
        self.scheduled_at
    }

    pub fn last_flush_at(&self) -> Option<u64> {
        self.last_flush_at
    }
}

// ───────────────────────────────────────────────────────────────────
// Async driver
// ───────────────────────────────────────────────────────────────────

enum WriteOp {
    Set(ChannelPath, EphemeralValue),
    Remove(ChannelPath),
    Barrier(oneshot::Sender<()>),
}

struct Stream {
    state: ThrottleState<EphemeralValue>,
    timer: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct PublisherState {
    streams: FxHashMap<ChannelPath, Stream>,
    written: FxHashSet<ChannelPath>,
    visibility: Visibility,
    closed: bool,
}

struct Shared {
    state: Mutex<PublisherState>,
    writes: mpsc::UnboundedSender<WriteOp>,
    flushes: AtomicU64,
}

impl Shared {
    fn write(&self, path: ChannelPath, value: EphemeralValue, state: &mut PublisherState) {
        state.written.insert(path.clone());
        self.flushes.fetch_add(1, Ordering::SeqCst);
        let _ = self.writes.send(WriteOp::Set(path, value));
    }
}

/// Rate-limited writer for ephemeral streams.
pub struct ThrottledPublisher {
    config: ThrottleConfig,
    clock: Arc<dyn Clock>,
    shared: Arc<Shared>,
}

impl ThrottledPublisher {
    /// Must be called inside a tokio runtime.
    pub fn new(channel: Arc<dyn EphemeralChannel>, clock: Arc<dyn Clock>, config: ThrottleConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::writer(channel, rx));
        Self {
            config,
            clock,
            shared: Arc::new(Shared {
                state: Mutex::new(PublisherState::default()),
                writes: tx,
                flushes: AtomicU64::new(0),
            }),
        }
    }

    /// Ordered writer: registers `on_disconnect_remove` before the first
    /// write of each path.
    async fn writer(channel: Arc<dyn EphemeralChannel>, mut rx: mpsc::UnboundedReceiver<WriteOp>) {
        let mut registered: FxHashSet<ChannelPath> = FxHashSet::default();
        while let Some(op) = rx.recv().await {
            match op {
                WriteOp::Set(path, value) => {
                    if registered.insert(path.clone()) {
                        if let Err(e) = channel.on_disconnect_remove(&path).await {
                            log::warn!("Failed to register disconnect removal for {path}: {e}");
                        }
                    }
                    if let Err(e) = channel.set(&path, value).await {
                        log::debug!("Ephemeral write to {path} failed: {e}");
                    }
                }
                WriteOp::Remove(path) => {
                    if let Err(e) = channel.remove(&path).await {
                        log::debug!("Ephemeral remove of {path} failed: {e}");
                    }
                }
                WriteOp::Barrier(done) => {
                    let _ = done.send(());
                }
            }
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Publish `value` on `path`, subject to the stream's interval.
    pub fn publish(&self, path: &ChannelPath, value: EphemeralValue) {
        let mut state = lock(&self.shared.state);
        if state.closed {
            return;
        }
        let now = self.clock.now_ms();
        let interval = self.config.interval(value.stream_kind(), state.visibility);
        let stream = state.streams.entry(path.clone()).or_insert_with(|| Stream {
            state: ThrottleState::new(),
            timer: None,
        });

        match stream.state.offer(value, now, interval) {
            Offer::Write(value) => {
                if let Some(timer) = stream.timer.take() {
                    timer.abort();
                }
                self.shared.write(path.clone(), value, &mut state);
            }
            Offer::Scheduled { at } => {
                let delay = at.saturating_sub(now);
                let shared = self.shared.clone();
                let timer_path = path.clone();
                stream.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    let mut state = lock(&shared.state);
                    let due = state.streams.get_mut(&timer_path).and_then(|s| {
                        s.timer = None;
                        s.state.fire()
                    });
                    if let Some(value) = due {
                        shared.write(timer_path, value, &mut state);
                    }
                }));
            }
            Offer::Coalesced => {
                log::trace!("Coalesced write on {path}");
            }
        }
    }

    /// Tear down one stream: cancel its unflushed payload and remove its key.
    pub fn end_stream(&self, path: &ChannelPath) {
        let mut state = lock(&self.shared.state);
        if let Some(mut stream) = state.streams.remove(path) {
            stream.state.cancel();
            if let Some(timer) = stream.timer.take() {
                timer.abort();
            }
        }
        state.written.remove(path);
        let _ = self.shared.writes.send(WriteOp::Remove(path.clone()));
    }

    pub fn set_visibility(&self, visibility: Visibility) {
        lock(&self.shared.state).visibility = visibility;
    }

    pub fn visibility(&self) -> Visibility {
        lock(&self.shared.state).visibility
    }

    /// Whether `path` has a parked payload waiting for its slot.
    pub fn has_pending(&self, path: &ChannelPath) -> bool {
        lock(&self.shared.state)
            .streams
            .get(path)
            .is_some_and(|s| s.state.has_pending())
    }

    /// Writes handed to the channel so far.
    pub fn flush_count(&self) -> u64 {
        self.shared.flushes.load(Ordering::SeqCst)
    }

    /// Resolves once every write decided so far has reached the channel.
    pub async fn flushed(&self) {
        let (tx, rx) = oneshot::channel();
        if self.shared.writes.send(WriteOp::Barrier(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Cancel every pending write, remove every written path and wait for
    /// the channel to see it. Later publishes are ignored.
    pub async fn close(&self) {
        {
            let mut state = lock(&self.shared.state);
            if state.closed {
                return;
            }
            state.closed = true;
            for (_, mut stream) in state.streams.drain() {
                stream.state.cancel();
                if let Some(timer) = stream.timer.take() {
                    timer.abort();
                }
            }
            for path in state.written.drain() {
                let _ = self.shared.writes.send(WriteOp::Remove(path));
            }
        }
        self.flushed().await;
    }
}

impl Drop for ThrottledPublisher {
    fn drop(&mut self) {
        let mut state = lock(&self.shared.state);
        for stream in state.streams.values_mut() {
            if let Some(timer) = stream.timer.take() {
                timer.abort();
            }
        }
    }
}
