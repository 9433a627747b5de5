//! In-process ephemeral channel.
//!
//! ```text
//!  MemoryChannel ─┐                        ┌─► Subscription (prefix A)
//!  MemoryChannel ─┼─► MemoryHub ─ broadcast┼─► Subscription (prefix B)
//!  MemoryChannel ─┘   (values)             └─► ...
//! ```
//!
//! One [`MemoryHub`] plays the role of the shared realtime backend; each
//! client gets its own [`MemoryChannel`] connection from [`MemoryHub::connect`].
//! Dropping or disconnecting a connection removes the paths it registered
//! with `on_disconnect_remove`.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};

use crate::channel::{
    ChannelError, ChannelEvent, ChannelPath, DeliveredPaths, EphemeralChannel, EphemeralValue,
};
use crate::storage::lock;
use crate::subscription::Subscription;

/// Default fan-out buffer per subscriber.
pub const DEFAULT_HUB_CAPACITY: usize = 1024;

struct HubInner {
    values: Mutex<BTreeMap<ChannelPath, EphemeralValue>>,
    events: broadcast::Sender<ChannelEvent>,
    next_connection: AtomicU64,
}

impl HubInner {
    fn entries_under(&self, prefix: &ChannelPath) -> Vec<(ChannelPath, EphemeralValue)> {
        lock(&self.values)
            .iter()
            .filter(|(p, _)| p.is_under(prefix))
            .map(|(p, v)| (p.clone(), v.clone()))
            .collect()
    }
}

/// Shared state of an in-process channel.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HUB_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(HubInner {
                values: Mutex::new(BTreeMap::new()),
                events,
                next_connection: AtomicU64::new(0),
            }),
        }
    }

    /// Open a new client connection.
    pub fn connect(&self) -> MemoryChannel {
        let id = self.inner.next_connection.fetch_add(1, Ordering::SeqCst);
        log::debug!("Memory channel connection {id} opened");
        MemoryChannel {
            id,
            hub: self.clone(),
            registered: Mutex::new(BTreeSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn set(&self, path: &ChannelPath, value: EphemeralValue) {
        let mut values = lock(&self.inner.values);
        values.insert(path.clone(), value.clone());
        let _ = self.inner.events.send(ChannelEvent::Set {
            path: path.clone(),
            value,
        });
    }

    pub fn remove(&self, path: &ChannelPath) -> bool {
        let mut values = lock(&self.inner.values);
        let existed = values.remove(path).is_some();
        if existed {
            let _ = self.inner.events.send(ChannelEvent::Removed { path: path.clone() });
        }
        existed
    }

    pub fn get(&self, path: &ChannelPath) -> Option<EphemeralValue> {
        lock(&self.inner.values).get(path).cloned()
    }

    /// Current `(path, value)` pairs under `prefix`.
    pub fn entries_under(&self, prefix: &ChannelPath) -> Vec<(ChannelPath, EphemeralValue)> {
        self.inner.entries_under(prefix)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.values).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live events under `prefix`, current values first. A subscriber that
    /// falls behind the broadcast buffer is resynchronized from the current
    /// values, including `Removed` for paths it missed the removal of.
    pub fn subscribe(&self, prefix: &ChannelPath) -> Subscription<ChannelEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut delivered = DeliveredPaths::default();
        let mut events = {
            // Snapshot and join the broadcast under the same lock so no
            // event falls between them.
            let values = lock(&self.inner.values);
            for (path, value) in values.iter().filter(|(p, _)| p.is_under(prefix)) {
                let event = ChannelEvent::Set {
                    path: path.clone(),
                    value: value.clone(),
                };
                delivered.observe(&event);
                let _ = tx.send(event);
            }
            self.inner.events.subscribe()
        };

        let prefix = prefix.clone();
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if !event.path().is_under(&prefix) {
                            continue;
                        }
                        delivered.observe(&event);
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("Subscriber on {prefix} lagged, skipped {n} events; resyncing");
                        let resync = delivered.resync(inner.entries_under(&prefix));
                        if resync.into_iter().any(|event| tx.send(event).is_err()) {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        let abort = task.abort_handle();
        Subscription::new(rx, move || abort.abort())
    }
}

/// One client's connection to a [`MemoryHub`].
pub struct MemoryChannel {
    id: u64,
    hub: MemoryHub,
    registered: Mutex<BTreeSet<ChannelPath>>,
    closed: AtomicBool,
}

impl MemoryChannel {
    pub fn hub(&self) -> &MemoryHub {
        &self.hub
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        if self.is_closed() {
            Err(ChannelError::Closed)
        } else {
            Ok(())
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let paths = std::mem::take(&mut *lock(&self.registered));
        for path in &paths {
            self.hub.remove(path);
        }
        log::debug!(
            "Memory channel connection {} closed, removed {} paths",
            self.id,
            paths.len()
        );
    }
}

#[async_trait]
impl EphemeralChannel for MemoryChannel {
    async fn set(&self, path: &ChannelPath, value: EphemeralValue) -> Result<(), ChannelError> {
        self.ensure_open()?;
        self.hub.set(path, value);
        Ok(())
    }

    async fn remove(&self, path: &ChannelPath) -> Result<(), ChannelError> {
        self.ensure_open()?;
        self.hub.remove(path);
        Ok(())
    }

    async fn subscribe(&self, prefix: &ChannelPath) -> Result<Subscription<ChannelEvent>, ChannelError> {
        self.ensure_open()?;
        Ok(self.hub.subscribe(prefix))
    }

    async fn on_disconnect_remove(&self, path: &ChannelPath) -> Result<(), ChannelError> {
        self.ensure_open()?;
        lock(&self.registered).insert(path.clone());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ChannelError> {
        self.close();
        Ok(())
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.close();
    }
}
