//! Ephemeral Channel Adapter.
//!
//! Low-latency, non-persistent key/value broadcast for everything that moves
//! faster than the durable store should: cursors, drags in progress,
//! selections and presence heartbeats.
//!
//! Path layout:
//! ```text
//! boards/{board}/{presence|cursors|drags|selections}/{user}
//! ```
//!
//! Values travel as bincode (serde mode) so a relay can forward them without
//! understanding them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use easel_core::{BoardId, ElementId, Point, RemoteDrag, UserId};

use crate::subscription::Subscription;

const ROOT: &str = "boards";

/// Category of an ephemeral stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Presence,
    Cursors,
    Drags,
    Selections,
}

impl StreamKind {
    pub const ALL: [StreamKind; 4] = [
        StreamKind::Presence,
        StreamKind::Cursors,
        StreamKind::Drags,
        StreamKind::Selections,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Presence => "presence",
            StreamKind::Cursors => "cursors",
            StreamKind::Drags => "drags",
            StreamKind::Selections => "selections",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ───────────────────────────────────────────────────────────────────
// Paths
// ───────────────────────────────────────────────────────────────────

/// Slash-separated channel key. Prefixes end with `/`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelPath(String);

impl ChannelPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Key of one user's stream on a board.
    pub fn stream(board: &BoardId, kind: StreamKind, user: &UserId) -> Self {
        Self(format!("{ROOT}/{board}/{kind}/{user}"))
    }

    /// Every stream on a board.
    pub fn board_prefix(board: &BoardId) -> Self {
        Self(format!("{ROOT}/{board}/"))
    }

    /// Every user's stream of one kind on a board.
    pub fn kind_prefix(board: &BoardId, kind: StreamKind) -> Self {
        Self(format!("{ROOT}/{board}/{kind}/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split a full stream key into its parts.
    pub fn parse(&self) -> Option<(BoardId, StreamKind, UserId)> {
        let mut parts = self.0.split('/');
        if parts.next()? != ROOT {
            return None;
        }
        let board = parts.next().filter(|s| !s.is_empty())?;
        let kind = StreamKind::parse(parts.next()?)?;
        let user = parts.next().filter(|s| !s.is_empty())?;
        if parts.next().is_some() {
            return None;
        }
        Some((BoardId::from(board), kind, UserId::from(user)))
    }

    /// Whether this path is `prefix` itself or lies below it. Matching is
    /// per segment, so `boards/b1` is not under `boards/b`.
    pub fn is_under(&self, prefix: &ChannelPath) -> bool {
        let (path, prefix) = (self.0.as_str(), prefix.0.as_str());
        if prefix.is_empty() {
            return true;
        }
        if prefix.ends_with('/') {
            return path.starts_with(prefix);
        }
        path == prefix
            || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
    }
}

impl fmt::Display for ChannelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelPath {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ───────────────────────────────────────────────────────────────────
// Values
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub display_name: Option<String>,
    pub updated_at: u64,
    pub cursor: Option<Point>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorRecord {
    pub x: f64,
    pub y: f64,
    pub updated_at: u64,
}

impl CursorRecord {
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Everything a user is dragging right now. One item for a single drag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DragRecord {
    pub items: Vec<RemoteDrag>,
    pub updated_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionRecord {
    pub ids: Vec<ElementId>,
    pub updated_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EphemeralValue {
    Presence(PresenceRecord),
    Cursor(CursorRecord),
    Drag(DragRecord),
    Selection(SelectionRecord),
}

impl EphemeralValue {
    /// The stream kind this value belongs on.
    pub fn stream_kind(&self) -> StreamKind {
        match self {
            EphemeralValue::Presence(_) => StreamKind::Presence,
            EphemeralValue::Cursor(_) => StreamKind::Cursors,
            EphemeralValue::Drag(_) => StreamKind::Drags,
            EphemeralValue::Selection(_) => StreamKind::Selections,
        }
    }

    pub fn updated_at(&self) -> u64 {
        match self {
            EphemeralValue::Presence(r) => r.updated_at,
            EphemeralValue::Cursor(r) => r.updated_at,
            EphemeralValue::Drag(r) => r.updated_at,
            EphemeralValue::Selection(r) => r.updated_at,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ChannelError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ChannelError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ChannelError> {
        let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ChannelError::Decode(e.to_string()))?;
        Ok(value)
    }
}

/// Change notification delivered to prefix subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChannelEvent {
    Set {
        path: ChannelPath,
        value: EphemeralValue,
    },
    Removed {
        path: ChannelPath,
    },
}

impl ChannelEvent {
    pub fn path(&self) -> &ChannelPath {
        match self {
            ChannelEvent::Set { path, .. } | ChannelEvent::Removed { path } => path,
        }
    }
}

/// Paths a subscriber currently holds a value for.
///
/// A fan-out that drops events for a slow subscriber can leave it holding
/// values whose `Removed` never arrived. [`DeliveredPaths::resync`] turns
/// the current values into the events that bring it back in line.
#[derive(Debug, Default)]
pub struct DeliveredPaths {
    paths: BTreeSet<ChannelPath>,
}

impl DeliveredPaths {
    pub fn observe(&mut self, event: &ChannelEvent) {
        match event {
            ChannelEvent::Set { path, .. } => {
                self.paths.insert(path.clone());
            }
            ChannelEvent::Removed { path } => {
                self.paths.remove(path);
            }
        }
    }

    /// `Removed` for every delivered path missing from `current`, then a
    /// `Set` for every current value.
    pub fn resync(&mut self, current: Vec<(ChannelPath, EphemeralValue)>) -> Vec<ChannelEvent> {
        let live: BTreeSet<ChannelPath> = current.iter().map(|(p, _)| p.clone()).collect();
        let mut events: Vec<ChannelEvent> = self
            .paths
            .difference(&live)
            .map(|path| ChannelEvent::Removed { path: path.clone() })
            .collect();
        events.extend(current.into_iter().map(|(path, value)| ChannelEvent::Set { path, value }));
        self.paths = live;
        events
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    #[error("Channel is closed")]
    Closed,

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Path-keyed broadcast with live prefix subscriptions.
#[async_trait]
pub trait EphemeralChannel: Send + Sync {
    /// Overwrite the value at `path` and notify subscribers.
    async fn set(&self, path: &ChannelPath, value: EphemeralValue) -> Result<(), ChannelError>;

    /// Remove `path`. Removing a missing path succeeds.
    async fn remove(&self, path: &ChannelPath) -> Result<(), ChannelError>;

    /// Live events for every path under `prefix`. Current values are
    /// delivered first as `Set` events.
    async fn subscribe(&self, prefix: &ChannelPath) -> Result<Subscription<ChannelEvent>, ChannelError>;

    /// Remove `path` automatically when this connection goes away.
    async fn on_disconnect_remove(&self, path: &ChannelPath) -> Result<(), ChannelError>;

    /// Drop the connection, running every registered removal.
    async fn disconnect(&self) -> Result<(), ChannelError>;
}
