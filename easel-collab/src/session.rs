//! Board session: one user's live connection to one board.
//!
//! ```text
//!  DurableStore ── 5 × subscribe(kind) ──► store pumps ──┐
//!  EphemeralChannel ── subscribe(board/) ─► channel pump ─┤
//!                                                         ▼
//!  gestures / agent ─────────────────────────► SessionState (tokio Mutex)
//!        │                                     Board · Presence · UndoStack
//!        │                                         │            │
//!        │         WriteIntents ─► writer task ────┘            ▼
//!        │                         (ordered, rollback)     watch<ViewState>
//!        └─► ThrottledPublisher ─► EphemeralChannel
//!
//!  tick task: linger expiry · presence windows · heartbeat
//! ```
//!
//! Every input is applied under the session mutex, so mutations and remote
//! updates interleave in arrival order. Durable writes go through one
//! ordered writer task; a failed write rolls its optimistic entry back.

use serde::Deserialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Mutex, Notify};
use tokio::task::JoinHandle;

use easel_core::{
    Board, BoardId, BoardSnapshot, BoardView, ElementBody, ElementId, ElementKind, ElementPatch,
    ExportedElement, HistoryConfig, LingerConfig, Point, RemoteDrag, UndoStack, UserId, WriteIntent,
};

use crate::channel::{
    ChannelError, ChannelEvent, ChannelPath, CursorRecord, DragRecord, EphemeralChannel,
    EphemeralValue, PresenceRecord, SelectionRecord, StreamKind,
};
use crate::clock::{Clock, SystemClock};
use crate::presence::{PresenceConfig, PresenceTracker, RemoteCursor, UserPresence};
use crate::storage::{DurableStore, StoreError};
use crate::subscription::Subscription;
use crate::throttle::{ThrottleConfig, ThrottledPublisher, Visibility};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name shown to other users. `None` shows as `Guest-xxxx`.
    pub display_name: Option<String>,
    pub linger: LingerConfig,
    pub history: HistoryConfig,
    pub throttle: ThrottleConfig,
    pub presence: PresenceConfig,
}

impl SessionConfig {
    pub fn for_testing() -> Self {
        Self {
            display_name: Some("Tester".into()),
            linger: LingerConfig::for_testing(),
            history: HistoryConfig::for_testing(),
            throttle: ThrottleConfig::for_testing(),
            presence: PresenceConfig::default(),
        }
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Session is closed")]
    Closed,
}

/// Everything the renderer draws for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub board: BoardView,
    pub users: Vec<UserPresence>,
    pub cursors: Vec<RemoteCursor>,
    pub can_undo: bool,
    pub can_redo: bool,
}

#[derive(Debug, Clone)]
pub enum ViewState {
    /// Waiting for the first snapshot of every element kind.
    Loading,
    Ready(Arc<SessionView>),
    /// Building the view failed. The session keeps running and the next
    /// successful build replaces this.
    Failed(String),
}

impl ViewState {
    pub fn ready(&self) -> Option<&Arc<SessionView>> {
        match self {
            ViewState::Ready(view) => Some(view),
            _ => None,
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Internals
// ───────────────────────────────────────────────────────────────────

enum WriteJob {
    Write(WriteIntent),
    Barrier(oneshot::Sender<()>),
}

struct SessionState {
    board: Board,
    presence: PresenceTracker,
    history: UndoStack<BoardSnapshot>,
    loaded: [bool; 5],
    /// Elements the local user is dragging right now
    dragging: Vec<ElementId>,
    /// Elements moved by the current drag but not yet persisted.
    unsaved_drag: Vec<ElementId>,
    last_cursor: Option<Point>,
    closed: bool,
}

struct Inner {
    board_id: BoardId,
    user: UserId,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<SessionState>,
    view_tx: watch::Sender<ViewState>,
    writes: mpsc::UnboundedSender<WriteJob>,
    publisher: ThrottledPublisher,
    wake: Notify,
}

impl Inner {
    fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    fn path(&self, kind: StreamKind) -> ChannelPath {
        ChannelPath::stream(&self.board_id, kind, &self.user)
    }

    fn enqueue(&self, writes: impl IntoIterator<Item = WriteIntent>) {
        for write in writes {
            if self.writes.send(WriteJob::Write(write)).is_err() {
                log::error!("Writer for board {} is gone", self.board_id);
                return;
            }
        }
    }

    /// Rebuild the view and publish it. A panic while building is caught
    /// and published as `Failed`.
    fn publish_view(&self, state: &mut SessionState) {
        if !state.loaded.iter().all(|l| *l) {
            return;
        }
        let now = self.now();
        let built = panic::catch_unwind(AssertUnwindSafe(|| SessionView {
            board: state.board.view(now),
            users: state.presence.list_users(now),
            cursors: state.presence.cursors(now),
            can_undo: state.history.can_undo(),
            can_redo: state.history.can_redo(),
        }));
        let next = match built {
            Ok(view) => ViewState::Ready(Arc::new(view)),
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                log::error!("Failed to build view for board {}: {reason}", self.board_id);
                ViewState::Failed(reason)
            }
        };
        self.view_tx.send_replace(next);
    }

    fn heartbeat(&self, state: &SessionState, now: u64) {
        let record = PresenceRecord {
            display_name: self.config.display_name.clone(),
            updated_at: now,
            cursor: state.last_cursor,
        };
        self.publisher
            .publish(&self.path(StreamKind::Presence), EphemeralValue::Presence(record));
    }

    fn publish_drag(&self, items: Vec<RemoteDrag>, now: u64) {
        let path = self.path(StreamKind::Drags);
        if items.is_empty() {
            self.publisher.end_stream(&path);
        } else {
            self.publisher.publish(
                &path,
                EphemeralValue::Drag(DragRecord {
                    items,
                    updated_at: now,
                }),
            );
        }
    }

    /// Keep the local drag record consistent with deletions.
    fn forget_deleted(&self, state: &mut SessionState, writes: &[WriteIntent], now: u64) {
        if state.dragging.is_empty() {
            return;
        }
        let before = state.dragging.len();
        state.dragging.retain(|id| {
            !writes
                .iter()
                .any(|w| matches!(w, WriteIntent::Delete { .. }) && w.id() == id)
        });
        if state.dragging.len() == before {
            return;
        }
        let items = drag_items(&state.board, &state.dragging);
        self.publish_drag(items, now);
    }

    /// Persist the staged positions of a drag that never saw `drag_end`,
    /// skipping ids in `except`.
    fn settle_drag(&self, state: &mut SessionState, except: &[WriteIntent]) {
        let unsaved = std::mem::take(&mut state.unsaved_drag);
        let writes: Vec<WriteIntent> = unsaved
            .iter()
            .filter(|id| !except.iter().any(|w| w.id() == *id))
            .filter_map(|id| match state.board.pending_write(id) {
                Some(write @ WriteIntent::Put(_)) => Some(write),
                _ => None,
            })
            .collect();
        if !writes.is_empty() {
            log::debug!("Persisting {} positions from an unfinished drag", writes.len());
            self.enqueue(writes);
        }
    }

    // ─── Input handlers ───────────────────────────────────────────

    async fn on_store_snapshot(&self, kind: ElementKind, elements: Vec<easel_core::Element>) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        let now = self.now();
        state.board.apply_durable_snapshot(kind, elements, now);
        state.loaded[kind.index()] = true;
        self.publish_view(&mut state);
        self.wake.notify_one();
    }

    async fn on_channel_event(&self, event: ChannelEvent) {
        let path = event.path().clone();
        let Some((board, stream, user)) = path.parse() else {
            log::debug!("Ignoring event on foreign path {path}");
            return;
        };
        if board != self.board_id {
            return;
        }

        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        let now = self.now();
        match (stream, event) {
            (StreamKind::Presence, ChannelEvent::Set { value: EphemeralValue::Presence(r), .. }) => {
                state.presence.apply_presence(&user, &r, now);
            }
            (StreamKind::Cursors, ChannelEvent::Set { value: EphemeralValue::Cursor(r), .. }) => {
                state.presence.apply_cursor(&user, &r, now);
            }
            (StreamKind::Drags, ChannelEvent::Set { value: EphemeralValue::Drag(r), .. }) => {
                state.board.apply_remote_drags(&user, r.items, now);
            }
            (StreamKind::Selections, ChannelEvent::Set { value: EphemeralValue::Selection(r), .. }) => {
                state.board.apply_remote_selection(&user, r.ids);
            }
            (StreamKind::Presence, ChannelEvent::Removed { .. }) => {
                state.presence.remove_presence(&user);
            }
            (StreamKind::Cursors, ChannelEvent::Removed { .. }) => {
                state.presence.remove_cursor(&user);
            }
            (StreamKind::Drags, ChannelEvent::Removed { .. }) => {
                state.board.clear_remote_drags(&user, now);
            }
            (StreamKind::Selections, ChannelEvent::Removed { .. }) => {
                state.board.clear_remote_selection(&user);
            }
            (stream, _) => {
                log::debug!("Value on {path} does not match stream {stream}");
                return;
            }
        }
        self.publish_view(&mut state);
        self.wake.notify_one();
    }
}

fn drag_items(board: &Board, ids: &[ElementId]) -> Vec<RemoteDrag> {
    ids.iter()
        .filter_map(|id| {
            let e = board.authoritative(id)?;
            let p = e.position()?;
            Some(RemoteDrag {
                element_id: id.clone(),
                x: p.x,
                y: p.y,
                updated_at: e.updated_at,
            })
        })
        .collect()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "view construction panicked".to_string()
    }
}

// ───────────────────────────────────────────────────────────────────
// Background tasks
// ───────────────────────────────────────────────────────────────────

async fn store_pump(inner: Arc<Inner>, kind: ElementKind, mut sub: Subscription<Vec<easel_core::Element>>) {
    while let Some(elements) = sub.recv().await {
        inner.on_store_snapshot(kind, elements).await;
    }
    log::debug!("{kind} subscription for board {} ended", inner.board_id);
}

async fn channel_pump(inner: Arc<Inner>, mut sub: Subscription<ChannelEvent>) {
    while let Some(event) = sub.recv().await {
        inner.on_channel_event(event).await;
    }
    log::debug!("Channel subscription for board {} ended", inner.board_id);
}

async fn writer(inner: Arc<Inner>, store: Arc<dyn DurableStore>, mut rx: mpsc::UnboundedReceiver<WriteJob>) {
    while let Some(job) = rx.recv().await {
        match job {
            WriteJob::Write(intent) => {
                let result = match &intent {
                    WriteIntent::Put(element) => store.put(&inner.board_id, element).await,
                    WriteIntent::Delete { id, .. } => store.delete(&inner.board_id, id).await,
                };
                match result {
                    Ok(()) => {
                        if matches!(intent, WriteIntent::Delete { .. }) {
                            let mut state = inner.state.lock().await;
                            if state.board.acknowledge(&intent) {
                                inner.publish_view(&mut state);
                            }
                        }
                    }
                    Err(e) => {
                        log::error!(
                            "Durable write of {} {} failed: {e}",
                            intent.kind(),
                            intent.id()
                        );
                        let mut state = inner.state.lock().await;
                        if state.board.rollback(&intent) {
                            inner.publish_view(&mut state);
                        }
                    }
                }
            }
            WriteJob::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
}

async fn ticker(inner: Arc<Inner>) {
    let tick_ms = inner.config.presence.tick_ms.max(1);
    let heartbeat_ms = inner.config.presence.heartbeat_ms;
    let mut last_heartbeat = inner.now();

    loop {
        let sleep_ms = {
            let state = inner.state.lock().await;
            let now = inner.now();
            match state.board.next_linger_expiry() {
                Some(at) => tick_ms.min(at.saturating_sub(now)).max(1),
                None => tick_ms,
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {}
            _ = inner.wake.notified() => {}
        }

        let mut state = inner.state.lock().await;
        if state.closed {
            break;
        }
        let now = inner.now();
        let board_changed = state.board.tick(now);
        let presence_changed = state.presence.tick(now);
        if board_changed || presence_changed {
            inner.publish_view(&mut state);
        }
        if now.saturating_sub(last_heartbeat) >= heartbeat_ms {
            inner.heartbeat(&state, now);
            last_heartbeat = now;
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Public handle
// ───────────────────────────────────────────────────────────────────

pub struct BoardSession {
    inner: Arc<Inner>,
    view_rx: watch::Receiver<ViewState>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl BoardSession {
    /// Open a session with the system clock. Must be called inside a tokio
    /// runtime.
    pub async fn open(
        board_id: BoardId,
        user: UserId,
        store: Arc<dyn DurableStore>,
        channel: Arc<dyn EphemeralChannel>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        Self::open_with_clock(board_id, user, store, channel, config, Arc::new(SystemClock::new())).await
    }

    pub async fn open_with_clock(
        board_id: BoardId,
        user: UserId,
        store: Arc<dyn DurableStore>,
        channel: Arc<dyn EphemeralChannel>,
        config: SessionConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SessionError> {
        // Subscribe before spawning anything so failures surface here.
        let mut store_subs = Vec::with_capacity(ElementKind::ALL.len());
        for kind in ElementKind::ALL {
            store_subs.push((kind, store.subscribe(&board_id, kind).await?));
        }
        let channel_sub = channel.subscribe(&ChannelPath::board_prefix(&board_id)).await?;

        let (view_tx, view_rx) = watch::channel(ViewState::Loading);
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let publisher = ThrottledPublisher::new(channel, clock.clone(), config.throttle.clone());

        let inner = Arc::new(Inner {
            state: Mutex::new(SessionState {
                board: Board::new(user.clone(), config.linger.clone()),
                presence: PresenceTracker::new(user.clone(), config.presence.clone()),
                history: UndoStack::new(config.history.clone()),
                loaded: [false; 5],
                dragging: Vec::new(),
                unsaved_drag: Vec::new(),
                last_cursor: None,
                closed: false,
            }),
            board_id,
            user,
            config,
            clock,
            view_tx,
            writes: write_tx,
            publisher,
            wake: Notify::new(),
        });

        let mut tasks = Vec::new();
        for (kind, sub) in store_subs {
            tasks.push(tokio::spawn(store_pump(inner.clone(), kind, sub)));
        }
        tasks.push(tokio::spawn(channel_pump(inner.clone(), channel_sub)));
        tasks.push(tokio::spawn(writer(inner.clone(), store, write_rx)));
        tasks.push(tokio::spawn(ticker(inner.clone())));

        {
            let state = inner.state.lock().await;
            inner.heartbeat(&state, inner.now());
        }
        log::info!("Opened board {} as {}", inner.board_id, inner.user);

        Ok(Self {
            inner,
            view_rx,
            tasks: std::sync::Mutex::new(tasks),
        })
    }

    pub fn board_id(&self) -> &BoardId {
        &self.inner.board_id
    }

    pub fn user(&self) -> &UserId {
        &self.inner.user
    }

    /// Live view updates for the renderer.
    pub fn view(&self) -> watch::Receiver<ViewState> {
        self.view_rx.clone()
    }

    pub fn current_view(&self) -> ViewState {
        self.view_rx.borrow().clone()
    }

    /// Resolves once the first full view has been published.
    pub async fn ready(&self) -> Result<Arc<SessionView>, SessionError> {
        let mut rx = self.view_rx.clone();
        let state = rx
            .wait_for(|s| !matches!(s, ViewState::Loading))
            .await
            .map_err(|_| SessionError::Closed)?;
        match &*state {
            ViewState::Ready(view) => Ok(view.clone()),
            _ => Err(SessionError::Closed),
        }
    }

    /// Run a batch of mutations against the board under one history entry.
    /// Every returned write is persisted in order.
    pub async fn mutate<R>(&self, f: impl FnOnce(&mut Board, u64) -> (R, Vec<WriteIntent>)) -> Result<R, SessionError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if state.closed {
            return Err(SessionError::Closed);
        }
        let now = inner.now();
        let snapshot = state.board.snapshot();
        let (result, writes) = f(&mut state.board, now);
        if writes.is_empty() {
            return Ok(result);
        }
        state.history.push(snapshot, now);
        inner.forget_deleted(&mut state, &writes, now);
        inner.enqueue(writes);
        inner.publish_view(&mut state);
        Ok(result)
    }

    pub async fn create(&self, body: ElementBody, parent_frame_id: Option<ElementId>) -> Result<ElementId, SessionError> {
        self.mutate(|board, now| {
            let (id, write) = board.create(body, parent_frame_id, now);
            (id, vec![write])
        })
        .await
    }

    /// Returns whether the element existed.
    pub async fn update(&self, id: &ElementId, patch: ElementPatch) -> Result<bool, SessionError> {
        self.mutate(|board, now| {
            let writes: Vec<WriteIntent> = board.update(id, &patch, now).into_iter().collect();
            (!writes.is_empty(), writes)
        })
        .await
    }

    pub async fn move_to(&self, id: &ElementId, to: Point) -> Result<bool, SessionError> {
        self.mutate(|board, now| {
            let writes: Vec<WriteIntent> = board.move_to(id, to, now).into_iter().collect();
            (!writes.is_empty(), writes)
        })
        .await
    }

    pub async fn resize(&self, id: &ElementId, width: f64, height: f64) -> Result<bool, SessionError> {
        self.mutate(|board, now| {
            let writes: Vec<WriteIntent> = board.resize(id, width, height, now).into_iter().collect();
            (!writes.is_empty(), writes)
        })
        .await
    }

    pub async fn delete(&self, id: &ElementId) -> Result<bool, SessionError> {
        self.mutate(|board, now| {
            let writes: Vec<WriteIntent> = board.delete(id, now).into_iter().collect();
            (!writes.is_empty(), writes)
        })
        .await
    }

    /// Returns how many elements were deleted.
    pub async fn delete_many(&self, ids: &[ElementId]) -> Result<usize, SessionError> {
        self.mutate(|board, now| {
            let writes = board.delete_many(ids, now);
            (writes.len(), writes)
        })
        .await
    }

    // ─── Gestures ─────────────────────────────────────────────────

    /// Begin dragging `ids`. Records one history entry for the whole drag.
    /// Positions left staged by an unfinished previous drag are persisted
    /// first.
    pub async fn drag_start(&self, ids: &[ElementId]) -> Result<(), SessionError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if state.closed {
            return Err(SessionError::Closed);
        }
        inner.settle_drag(&mut state, &[]);
        if !state.dragging.is_empty() {
            inner.publish_drag(Vec::new(), inner.now());
        }
        let dragging: Vec<ElementId> = ids.iter().filter(|id| state.board.contains(id)).cloned().collect();
        state.dragging = dragging;
        if state.dragging.is_empty() {
            return Ok(());
        }
        let snapshot = state.board.snapshot();
        state.history.push(snapshot, inner.now());
        Ok(())
    }

    /// Move dragged elements locally and stream the positions to other
    /// users. Nothing is persisted until `drag_end`, the next `drag_start`
    /// or `close`.
    pub async fn drag_move(&self, moves: &[(ElementId, Point)]) -> Result<(), SessionError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if state.closed {
            return Err(SessionError::Closed);
        }
        let now = inner.now();
        let staged = state.board.move_many(moves, now);
        if staged.is_empty() {
            return Ok(());
        }
        state.dragging = staged.iter().map(|w| w.id().clone()).collect();
        let SessionState { dragging, unsaved_drag, .. } = &mut *state;
        for id in dragging.iter() {
            if !unsaved_drag.contains(id) {
                unsaved_drag.push(id.clone());
            }
        }
        let items = drag_items(&state.board, &state.dragging);
        inner.publish_drag(items, now);
        inner.publish_view(&mut state);
        Ok(())
    }

    /// Finish a drag at `moves` and persist the final positions.
    pub async fn drag_end(&self, moves: &[(ElementId, Point)]) -> Result<(), SessionError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if state.closed {
            return Err(SessionError::Closed);
        }
        let now = inner.now();
        let writes = state.board.move_many(moves, now);
        inner.settle_drag(&mut state, &writes);
        state.dragging.clear();
        inner.publisher.end_stream(&inner.path(StreamKind::Drags));
        inner.enqueue(writes);
        inner.publish_view(&mut state);
        Ok(())
    }

    pub async fn cursor_move(&self, at: Point) {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if state.closed {
            return;
        }
        state.last_cursor = Some(at);
        let record = CursorRecord {
            x: at.x,
            y: at.y,
            updated_at: inner.now(),
        };
        inner
            .publisher
            .publish(&inner.path(StreamKind::Cursors), EphemeralValue::Cursor(record));
    }

    /// Share the local selection. An empty selection removes it.
    pub async fn select(&self, ids: Vec<ElementId>) {
        let inner = &self.inner;
        let path = inner.path(StreamKind::Selections);
        if ids.is_empty() {
            inner.publisher.end_stream(&path);
            return;
        }
        let record = SelectionRecord {
            ids,
            updated_at: inner.now(),
        };
        inner.publisher.publish(&path, EphemeralValue::Selection(record));
    }

    pub fn set_visibility(&self, visibility: Visibility) {
        self.inner.publisher.set_visibility(visibility);
    }

    // ─── History ──────────────────────────────────────────────────

    /// Returns whether there was anything to undo.
    pub async fn undo(&self) -> Result<bool, SessionError> {
        self.step_history(true).await
    }

    pub async fn redo(&self) -> Result<bool, SessionError> {
        self.step_history(false).await
    }

    async fn step_history(&self, back: bool) -> Result<bool, SessionError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if state.closed {
            return Err(SessionError::Closed);
        }
        let current = state.board.snapshot();
        let target = if back {
            state.history.undo(current)
        } else {
            state.history.redo(current)
        };
        let Some(target) = target else {
            return Ok(false);
        };
        let now = inner.now();
        let writes = state.board.restore(&target, now);
        log::debug!(
            "{} restored {} writes on board {}",
            if back { "Undo" } else { "Redo" },
            writes.len(),
            inner.board_id
        );
        inner.forget_deleted(&mut state, &writes, now);
        inner.enqueue(writes);
        inner.publish_view(&mut state);
        Ok(true)
    }

    // ─── Reads ────────────────────────────────────────────────────

    pub async fn users(&self) -> Vec<UserPresence> {
        let state = self.inner.state.lock().await;
        state.presence.list_users(self.inner.now())
    }

    pub async fn export(&self) -> Vec<ExportedElement> {
        self.inner.state.lock().await.board.export()
    }

    pub async fn export_json(&self) -> Result<String, serde_json::Error> {
        self.inner.state.lock().await.board.export_json()
    }

    /// Read the board without mutating it.
    pub async fn with_board<R>(&self, f: impl FnOnce(&Board) -> R) -> R {
        let state = self.inner.state.lock().await;
        f(&state.board)
    }

    /// Resolves once every durable write issued so far has completed and
    /// every ephemeral write decided so far reached the channel.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.inner.writes.send(WriteJob::Barrier(tx)).is_ok() {
            let _ = rx.await;
        }
        self.inner.publisher.flushed().await;
    }

    /// Tear down: cancel throttled writes, remove this user's ephemeral
    /// keys, finish pending durable writes and stop every task.
    pub async fn close(&self) {
        {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                return;
            }
            state.closed = true;
            self.inner.settle_drag(&mut state, &[]);
            state.dragging.clear();
        }
        self.inner.publisher.close().await;

        let (tx, rx) = oneshot::channel();
        if self.inner.writes.send(WriteJob::Barrier(tx)).is_ok() {
            let _ = rx.await;
        }

        self.abort_tasks();
        log::info!("Closed board {} for {}", self.inner.board_id, self.inner.user);
    }

    fn abort_tasks(&self) {
        let tasks = std::mem::take(&mut *crate::storage::lock(&self.tasks));
        for task in tasks {
            task.abort();
        }
    }
}

impl Drop for BoardSession {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}
