//! RocksDB-backed durable store.
//!
//! Column families:
//! - `elements` — element documents (JSON), keyed by `board \0 element_id`
//!
//! Every board's documents share a key prefix, so per-board reads and bulk
//! deletes are a single forward scan. Subscriptions are served in-process:
//! each committed write republishes the affected (board, kind) snapshot.

use async_trait::async_trait;
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use easel_core::{decode_element, encode_element, BoardId, Element, ElementId, ElementKind};

use super::{lock, DurableStore, StoreError, Subscribers};
use crate::subscription::Subscription;

const CF_ELEMENTS: &str = "elements";

const COLUMN_FAMILIES: &[&str] = &[CF_ELEMENTS];

/// Store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 32MB)
    pub write_buffer_size: usize,
    /// Deletes per write batch in `delete_all_in_board` (default: 500)
    pub max_batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("easel_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 32 * 1024 * 1024,
            max_batch_size: 500,
        }
    }
}

impl StoreConfig {
    /// Small caches for tests.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
            max_batch_size: 500,
        }
    }
}

pub struct RocksStore {
    /// RocksDB instance (single-threaded mode, concurrency via tokio)
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    subscribers: Subscribers,
    /// Serializes commit + publish so snapshots arrive in commit order.
    write_lock: Mutex<()>,
    batches: AtomicU64,
}

impl RocksStore {
    /// Open the store, creating the database and column families if needed.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(&config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;
        log::info!("Opened element store at {}", config.path.display());

        Ok(Self {
            db,
            config,
            subscribers: Subscribers::default(),
            write_lock: Mutex::new(()),
            batches: AtomicU64::new(0),
        })
    }

    fn cf_options(config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(4);
        opts
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Write batches committed by `delete_all_in_board`.
    pub fn batch_count(&self) -> u64 {
        self.batches.load(Ordering::SeqCst)
    }

    /// Raw stored document.
    pub fn get_raw(&self, board: &BoardId, id: &ElementId) -> Result<Option<Value>, StoreError> {
        let cf = self.cf(CF_ELEMENTS)?;
        match self.db.get_cf(cf, element_key(board, id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Store a raw document as-is, bypassing encoding.
    pub fn put_raw(&self, board: &BoardId, id: &ElementId, doc: &Value) -> Result<(), StoreError> {
        let _guard = lock(&self.write_lock);
        self.write_doc(board, id, doc)?;
        if let Some(kind) = kind_of(doc) {
            self.publish(board, kind)?;
        }
        Ok(())
    }

    // ─── Internals ────────────────────────────────────────────────────

    fn write_options(&self) -> WriteOptions {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        write_opts
    }

    fn write_doc(&self, board: &BoardId, id: &ElementId, doc: &Value) -> Result<(), StoreError> {
        let cf = self.cf(CF_ELEMENTS)?;
        let bytes = serde_json::to_vec(doc)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, element_key(board, id), bytes);
        self.db.write_opt(batch, &self.write_options())?;
        Ok(())
    }

    /// Every `(id, document)` on a board, in key order.
    fn scan_board(&self, board: &BoardId) -> Result<Vec<(ElementId, Value)>, StoreError> {
        let cf = self.cf(CF_ELEMENTS)?;
        let prefix = board_prefix(board);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut docs = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let id = match std::str::from_utf8(&key[prefix.len()..]) {
                Ok(id) => ElementId::from(id),
                Err(_) => {
                    log::warn!("Skipping element key with invalid UTF-8 on board {board}");
                    continue;
                }
            };
            match serde_json::from_slice::<Value>(&value) {
                Ok(doc) => docs.push((id, doc)),
                Err(e) => log::warn!("Skipping unreadable element {id} on board {board}: {e}"),
            }
        }
        Ok(docs)
    }

    fn snapshot(&self, board: &BoardId, kind: ElementKind) -> Result<Vec<Element>, StoreError> {
        Ok(self
            .scan_board(board)?
            .into_iter()
            .filter(|(_, doc)| kind_of(doc) == Some(kind))
            .map(|(id, doc)| decode_element(kind, id, &doc))
            .collect())
    }

    fn publish(&self, board: &BoardId, kind: ElementKind) -> Result<(), StoreError> {
        if self.subscribers.is_watched(board, kind) {
            let snapshot = self.snapshot(board, kind)?;
            self.subscribers.publish(board, kind, snapshot);
        }
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }
}

#[async_trait]
impl DurableStore for RocksStore {
    async fn subscribe(
        &self,
        board: &BoardId,
        kind: ElementKind,
    ) -> Result<Subscription<Vec<Element>>, StoreError> {
        let _guard = lock(&self.write_lock);
        let initial = self.snapshot(board, kind)?;
        Ok(self.subscribers.register(board, kind, initial))
    }

    async fn put(&self, board: &BoardId, element: &Element) -> Result<(), StoreError> {
        let _guard = lock(&self.write_lock);
        self.write_doc(board, &element.id, &encode_element(element))?;
        self.publish(board, element.kind())
    }

    async fn delete(&self, board: &BoardId, id: &ElementId) -> Result<(), StoreError> {
        let _guard = lock(&self.write_lock);
        let cf = self.cf(CF_ELEMENTS)?;
        let key = element_key(board, id);
        let kind = match self.db.get_cf(cf, &key)? {
            Some(bytes) => serde_json::from_slice::<Value>(&bytes)
                .ok()
                .as_ref()
                .and_then(kind_of),
            None => return Ok(()),
        };

        let mut batch = WriteBatch::default();
        batch.delete_cf(cf, &key);
        self.db.write_opt(batch, &self.write_options())?;

        if let Some(kind) = kind {
            self.publish(board, kind)?;
        }
        Ok(())
    }

    async fn delete_all_in_board(&self, board: &BoardId) -> Result<usize, StoreError> {
        let _guard = lock(&self.write_lock);
        let cf = self.cf(CF_ELEMENTS)?;
        let ids: Vec<ElementId> = self.scan_board(board)?.into_iter().map(|(id, _)| id).collect();

        for chunk in ids.chunks(self.config.max_batch_size.max(1)) {
            let mut batch = WriteBatch::default();
            for id in chunk {
                batch.delete_cf(cf, element_key(board, id));
            }
            self.db.write_opt(batch, &self.write_options())?;
            self.batches.fetch_add(1, Ordering::SeqCst);
        }

        for kind in ElementKind::ALL {
            self.subscribers.publish(board, kind, Vec::new());
        }
        log::info!("Deleted {} elements from board {board}", ids.len());
        Ok(ids.len())
    }

    async fn list(&self, board: &BoardId, kind: ElementKind) -> Result<Vec<Element>, StoreError> {
        self.snapshot(board, kind)
    }
}

fn board_prefix(board: &BoardId) -> Vec<u8> {
    let mut key = Vec::with_capacity(board.as_str().len() + 1);
    key.extend_from_slice(board.as_str().as_bytes());
    key.push(0);
    key
}

fn element_key(board: &BoardId, id: &ElementId) -> Vec<u8> {
    let mut key = board_prefix(board);
    key.extend_from_slice(id.as_str().as_bytes());
    key
}

fn kind_of(doc: &Value) -> Option<ElementKind> {
    doc.get("type")?.as_str()?.parse().ok()
}

fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use easel_core::{ElementBody, FrameBody, NoteBody};
    use serde_json::json;

    fn open(dir: &tempfile::TempDir) -> RocksStore {
        RocksStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap()
    }

    fn note(id: &str, at: u64) -> Element {
        Element::new(id.into(), "u1".into(), at, ElementBody::Note(NoteBody::default()))
    }

    #[tokio::test]
    async fn test_put_list_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        let board = BoardId::from("b1");
        let mut n = note("n1", 10);
        n.set_text("hello");
        store.put(&board, &n).await.unwrap();
        store
            .put(&board, &Element::new("f1".into(), "u1".into(), 11, ElementBody::Frame(FrameBody::default())))
            .await
            .unwrap();

        let notes = store.list(&board, ElementKind::Note).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].text(), Some("hello"));
        assert_eq!(notes[0].updated_at, 10);
        assert_eq!(store.list(&board, ElementKind::Frame).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_board_prefix_does_not_leak() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        store.put(&"b".into(), &note("x", 1)).await.unwrap();
        store.put(&"b1".into(), &note("y", 1)).await.unwrap();
        let on_b = store.list(&"b".into(), ElementKind::Note).await.unwrap();
        assert_eq!(on_b.len(), 1);
        assert_eq!(on_b[0].id.as_str(), "x");
    }

    #[tokio::test]
    async fn test_subscription_sees_writes_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        let board = BoardId::from("b1");
        let mut sub = store.subscribe(&board, ElementKind::Note).await.unwrap();
        assert!(sub.recv().await.unwrap().is_empty());

        store.put(&board, &note("a", 1)).await.unwrap();
        store.put(&board, &note("b", 2)).await.unwrap();
        store.delete(&board, &"a".into()).await.unwrap();

        assert_eq!(sub.recv().await.unwrap().len(), 1);
        assert_eq!(sub.recv().await.unwrap().len(), 2);
        let last = sub.recv().await.unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].id.as_str(), "b");
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        assert!(store.delete(&"b1".into(), &"ghost".into()).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_all_in_board_batches() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::for_testing(dir.path().join("db"));
        config.max_batch_size = 3;
        let store = RocksStore::open(config).unwrap();
        let board = BoardId::from("b1");
        for i in 0..7 {
            store.put(&board, &note(&format!("n{i}"), i)).await.unwrap();
        }
        store.put(&"b2".into(), &note("other", 1)).await.unwrap();

        assert_eq!(store.delete_all_in_board(&board).await.unwrap(), 7);
        assert_eq!(store.batch_count(), 3);
        assert!(store.list(&board, ElementKind::Note).await.unwrap().is_empty());
        assert_eq!(store.list(&"b2".into(), ElementKind::Note).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reopen_persists() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open(&dir);
            store.put(&"b1".into(), &note("keep", 5)).await.unwrap();
        }
        let store = open(&dir);
        let notes = store.list(&"b1".into(), ElementKind::Note).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].created_at, 5);
    }

    #[tokio::test]
    async fn test_raw_document_normalized_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        let board = BoardId::from("b1");
        store
            .put_raw(
                &board,
                &"n1".into(),
                &json!({"type": "note", "x": "bad", "updatedAt": "2024-01-01T00:00:00Z"}),
            )
            .unwrap();
        let notes = store.list(&board, ElementKind::Note).await.unwrap();
        assert_eq!(notes[0].position().unwrap().x, 0.0);
        assert_eq!(notes[0].updated_at, 1_704_067_200_000);
        assert!(store.get_raw(&board, &"n1".into()).unwrap().is_some());
    }
}
