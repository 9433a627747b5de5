//! Durable Store Adapter.
//!
//! ```text
//! ┌──────────────┐  put / delete   ┌───────────────────────────┐
//! │ BoardSession │ ──────────────► │ dyn DurableStore          │
//! │ (writer)     │                 │  ├── MemoryStore          │
//! └──────────────┘                 │  └── RocksStore (CF       │
//!        ▲                         │       "elements")         │
//!        │ Vec<Element> per kind   └─────────────┬─────────────┘
//!        └───────────────────────────────────────┘
//!                  subscribe(board, kind)
//! ```
//!
//! Stored documents are JSON objects in the shape produced by
//! [`easel_core::encode_element`]. Decoding goes through
//! [`easel_core::decode_element`], which normalizes timestamps and defaults
//! malformed fields, so subscribers always receive well-typed elements.

pub mod memory;
pub mod rocks;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use thiserror::Error;
use tokio::sync::mpsc;

use easel_core::{BoardId, Element, ElementId, ElementKind};

use crate::subscription::Subscription;

pub use memory::MemoryStore;
pub use rocks::{RocksStore, StoreConfig};

/// Storage errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Write rejected: {0}")]
    Unavailable(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// CRUD over typed element documents with live per-kind subscriptions.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Live snapshot stream of every element of `kind` on `board`. The
    /// current snapshot is delivered immediately.
    async fn subscribe(
        &self,
        board: &BoardId,
        kind: ElementKind,
    ) -> Result<Subscription<Vec<Element>>, StoreError>;

    /// Insert or overwrite an element document.
    async fn put(&self, board: &BoardId, element: &Element) -> Result<(), StoreError>;

    /// Delete an element document. Deleting a missing id succeeds.
    async fn delete(&self, board: &BoardId, id: &ElementId) -> Result<(), StoreError>;

    /// Delete every element on a board in chunks. Returns the count.
    async fn delete_all_in_board(&self, board: &BoardId) -> Result<usize, StoreError>;

    /// One-shot read of every element of `kind` on `board`.
    async fn list(&self, board: &BoardId, kind: ElementKind) -> Result<Vec<Element>, StoreError>;
}

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ───────────────────────────────────────────────────────────────────
// Subscriber bookkeeping shared by both stores
// ───────────────────────────────────────────────────────────────────

type Topic = (BoardId, ElementKind);

#[derive(Default)]
struct SubscriberMap {
    next_id: u64,
    topics: FxHashMap<Topic, Vec<(u64, mpsc::UnboundedSender<Vec<Element>>)>>,
}

/// Per-(board, kind) fan-out of snapshots.
#[derive(Default, Clone)]
pub(crate) struct Subscribers {
    inner: Arc<Mutex<SubscriberMap>>,
}

impl Subscribers {
    /// Register a subscriber and deliver `initial` to it first.
    pub(crate) fn register(
        &self,
        board: &BoardId,
        kind: ElementKind,
        initial: Vec<Element>,
    ) -> Subscription<Vec<Element>> {
        let topic = (board.clone(), kind);
        let weak: Weak<Mutex<SubscriberMap>> = Arc::downgrade(&self.inner);
        let mut map = lock(&self.inner);
        let id = map.next_id;
        map.next_id += 1;

        let cancel_topic = topic.clone();
        let (tx, sub) = Subscription::channel(move || {
            if let Some(inner) = weak.upgrade() {
                let mut map = lock(&inner);
                if let Some(list) = map.topics.get_mut(&cancel_topic) {
                    list.retain(|(sid, _)| *sid != id);
                    if list.is_empty() {
                        map.topics.remove(&cancel_topic);
                    }
                }
            }
        });
        let _ = tx.send(initial);
        map.topics.entry(topic).or_default().push((id, tx));
        sub
    }

    pub(crate) fn is_watched(&self, board: &BoardId, kind: ElementKind) -> bool {
        lock(&self.inner).topics.contains_key(&(board.clone(), kind))
    }

    /// Push a snapshot to every subscriber of the topic.
    pub(crate) fn publish(&self, board: &BoardId, kind: ElementKind, snapshot: Vec<Element>) {
        let mut map = lock(&self.inner);
        let topic = (board.clone(), kind);
        if let Some(list) = map.topics.get_mut(&topic) {
            list.retain(|(_, tx)| tx.send(snapshot.clone()).is_ok());
            log::trace!("published {kind} snapshot of {} to {} subscribers", snapshot.len(), list.len());
            if list.is_empty() {
                map.topics.remove(&topic);
            }
        }
    }

    pub(crate) fn count(&self) -> usize {
        lock(&self.inner).topics.values().map(Vec::len).sum()
    }
}
