//! In-process durable store.
//!
//! Holds raw JSON documents exactly like a remote document database would,
//! so malformed documents and foreign timestamp shapes can be injected with
//! [`MemoryStore::put_raw`]. Writes can be delayed or made to fail for
//! exercising optimistic rollback.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use easel_core::{decode_element, encode_element, BoardId, Element, ElementId, ElementKind};

use super::{lock, DurableStore, StoreError, Subscribers};
use crate::subscription::Subscription;

/// Default chunk size for bulk deletes.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 500;

type DocKey = (BoardId, ElementId);

pub struct MemoryStore {
    docs: Mutex<BTreeMap<DocKey, Value>>,
    subscribers: Subscribers,
    max_batch_size: usize,
    fail_writes: AtomicBool,
    fail_next: AtomicUsize,
    latency_ms: AtomicU64,
    writes: AtomicU64,
    batches: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_batch_size(DEFAULT_MAX_BATCH_SIZE)
    }

    pub fn with_batch_size(max_batch_size: usize) -> Self {
        Self {
            docs: Mutex::new(BTreeMap::new()),
            subscribers: Subscribers::default(),
            max_batch_size: max_batch_size.max(1),
            fail_writes: AtomicBool::new(false),
            fail_next: AtomicUsize::new(0),
            latency_ms: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            batches: AtomicU64::new(0),
        }
    }

    // ─── Test controls ────────────────────────────────────────────

    /// Make every subsequent write fail until switched off.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make the next `n` writes fail.
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Delay every write by `latency` before it lands.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Store a raw document as-is, bypassing encoding.
    pub fn put_raw(&self, board: &BoardId, id: &ElementId, doc: Value) {
        let kind = kind_of(&doc);
        let mut docs = lock(&self.docs);
        docs.insert((board.clone(), id.clone()), doc);
        if let Some(kind) = kind {
            self.subscribers.publish(board, kind, snapshot(&docs, board, kind));
        }
    }

    /// Raw stored document.
    pub fn get_raw(&self, board: &BoardId, id: &ElementId) -> Option<Value> {
        lock(&self.docs).get(&(board.clone(), id.clone())).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.docs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Successful single-document writes so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Batches committed by `delete_all_in_board`.
    pub fn batch_count(&self) -> u64 {
        self.batches.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.count()
    }

    async fn before_write(&self) -> Result<(), StoreError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

fn kind_of(doc: &Value) -> Option<ElementKind> {
    doc.get("type")?.as_str()?.parse().ok()
}

fn snapshot(docs: &BTreeMap<DocKey, Value>, board: &BoardId, kind: ElementKind) -> Vec<Element> {
    docs.iter()
        .filter(|((b, _), _)| b == board)
        .filter(|(_, doc)| kind_of(doc) == Some(kind))
        .map(|((_, id), doc)| decode_element(kind, id.clone(), doc))
        .collect()
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn subscribe(
        &self,
        board: &BoardId,
        kind: ElementKind,
    ) -> Result<Subscription<Vec<Element>>, StoreError> {
        let docs = lock(&self.docs);
        let initial = snapshot(&docs, board, kind);
        Ok(self.subscribers.register(board, kind, initial))
    }

    async fn put(&self, board: &BoardId, element: &Element) -> Result<(), StoreError> {
        self.before_write().await?;
        let kind = element.kind();
        let mut docs = lock(&self.docs);
        docs.insert((board.clone(), element.id.clone()), encode_element(element));
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.subscribers.is_watched(board, kind) {
            self.subscribers.publish(board, kind, snapshot(&docs, board, kind));
        }
        Ok(())
    }

    async fn delete(&self, board: &BoardId, id: &ElementId) -> Result<(), StoreError> {
        self.before_write().await?;
        let mut docs = lock(&self.docs);
        let removed = docs.remove(&(board.clone(), id.clone()));
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = removed.as_ref().and_then(kind_of) {
            self.subscribers.publish(board, kind, snapshot(&docs, board, kind));
        }
        Ok(())
    }

    async fn delete_all_in_board(&self, board: &BoardId) -> Result<usize, StoreError> {
        self.before_write().await?;
        let mut docs = lock(&self.docs);
        let keys: Vec<DocKey> = docs.keys().filter(|(b, _)| b == board).cloned().collect();
        for chunk in keys.chunks(self.max_batch_size) {
            for key in chunk {
                docs.remove(key);
            }
            self.batches.fetch_add(1, Ordering::SeqCst);
        }
        for kind in ElementKind::ALL {
            self.subscribers.publish(board, kind, Vec::new());
        }
        log::info!("Deleted {} elements from board {board}", keys.len());
        Ok(keys.len())
    }

    async fn list(&self, board: &BoardId, kind: ElementKind) -> Result<Vec<Element>, StoreError> {
        Ok(snapshot(&lock(&self.docs), board, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use easel_core::{ElementBody, NoteBody, TextBody};
    use serde_json::json;

    fn board() -> BoardId {
        BoardId::from("b1")
    }

    fn note(id: &str, at: u64) -> Element {
        Element::new(id.into(), "u1".into(), at, ElementBody::Note(NoteBody::default()))
    }

    #[tokio::test]
    async fn test_subscribe_delivers_current_snapshot() {
        let store = MemoryStore::new();
        store.put(&board(), &note("a", 1)).await.unwrap();
        let mut sub = store.subscribe(&board(), ElementKind::Note).await.unwrap();
        let first = sub.recv().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id.as_str(), "a");
    }

    #[tokio::test]
    async fn test_put_and_delete_notify_matching_kind() {
        let store = MemoryStore::new();
        let mut notes = store.subscribe(&board(), ElementKind::Note).await.unwrap();
        let mut texts = store.subscribe(&board(), ElementKind::Text).await.unwrap();
        assert!(notes.recv().await.unwrap().is_empty());
        assert!(texts.recv().await.unwrap().is_empty());

        store.put(&board(), &note("a", 1)).await.unwrap();
        assert_eq!(notes.recv().await.unwrap().len(), 1);
        assert!(texts.try_recv().is_none());

        store.delete(&board(), &"a".into()).await.unwrap();
        assert!(notes.recv().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_boards_are_isolated() {
        let store = MemoryStore::new();
        let mut other = store.subscribe(&"b2".into(), ElementKind::Note).await.unwrap();
        other.recv().await.unwrap();
        store.put(&board(), &note("a", 1)).await.unwrap();
        assert!(other.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_raw_documents_are_defaulted() {
        let store = MemoryStore::new();
        store.put_raw(
            &board(),
            &"t1".into(),
            json!({"type": "text", "text": 12, "updatedAt": {"_seconds": 2, "_nanoseconds": 0}}),
        );
        let list = store.list(&board(), ElementKind::Text).await.unwrap();
        let ElementBody::Text(body) = &list[0].body else { panic!("expected text") };
        assert_eq!(body.text, "12");
        assert_eq!(body.font_size, TextBody::default().font_size);
        assert_eq!(list[0].updated_at, 2000);
    }

    #[tokio::test]
    async fn test_untyped_documents_are_skipped() {
        let store = MemoryStore::new();
        store.put_raw(&board(), &"x".into(), json!({"text": "no type"}));
        for kind in ElementKind::ALL {
            assert!(store.list(&board(), kind).await.unwrap().is_empty());
        }
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryStore::new();
        store.fail_next_writes(1);
        assert!(store.put(&board(), &note("a", 1)).await.is_err());
        assert!(store.put(&board(), &note("a", 1)).await.is_ok());

        store.set_fail_writes(true);
        assert!(matches!(
            store.delete(&board(), &"a".into()).await,
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_all_is_chunked() {
        let store = MemoryStore::with_batch_size(2);
        for i in 0..5 {
            store.put(&board(), &note(&format!("n{i}"), i)).await.unwrap();
        }
        store.put(&"b2".into(), &note("keep", 1)).await.unwrap();
        assert_eq!(store.delete_all_in_board(&board()).await.unwrap(), 5);
        assert_eq!(store.batch_count(), 3);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_subscriber() {
        let store = MemoryStore::new();
        let sub = store.subscribe(&board(), ElementKind::Note).await.unwrap();
        assert_eq!(store.subscriber_count(), 1);
        sub.unsubscribe();
        assert_eq!(store.subscriber_count(), 0);
    }
}
