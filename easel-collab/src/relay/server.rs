//! Relay server.
//!
//! Holds the current value of every ephemeral path and fans changes out to
//! connected clients. Each connection keeps its own subscription table and
//! the set of paths it registered for removal; when the socket closes those
//! paths are removed and the removals broadcast like any other change.

use futures_util::{SinkExt, StreamExt};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use super::protocol::{RelayFrame, SubscriptionId};
use crate::channel::{ChannelEvent, ChannelPath, DeliveredPaths, EphemeralValue};
use crate::storage::lock;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Relay configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast buffer per connection before it starts lagging
    pub broadcast_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9191".to_string(),
            broadcast_capacity: 1024,
        }
    }
}

impl RelayConfig {
    pub fn for_testing(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            broadcast_capacity: 256,
        }
    }
}

/// Relay statistics.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_frames: u64,
    pub total_bytes: u64,
    /// Paths removed because their owner disconnected
    pub disconnect_removals: u64,
}

struct Shared {
    values: Mutex<BTreeMap<ChannelPath, EphemeralValue>>,
    events: broadcast::Sender<ChannelEvent>,
    stats: RwLock<RelayStats>,
}

impl Shared {
    fn set(&self, path: ChannelPath, value: EphemeralValue) {
        let mut values = lock(&self.values);
        values.insert(path.clone(), value.clone());
        let _ = self.events.send(ChannelEvent::Set { path, value });
    }

    fn remove(&self, path: &ChannelPath) -> bool {
        let mut values = lock(&self.values);
        let existed = values.remove(path).is_some();
        if existed {
            let _ = self.events.send(ChannelEvent::Removed { path: path.clone() });
        }
        existed
    }

    fn entries_under(&self, prefix: &ChannelPath) -> Vec<(ChannelPath, EphemeralValue)> {
        lock(&self.values)
            .iter()
            .filter(|(p, _)| p.is_under(prefix))
            .map(|(path, value)| (path.clone(), value.clone()))
            .collect()
    }
}

/// Per-connection state.
struct Connection {
    id: Uuid,
    addr: SocketAddr,
    subs: FxHashMap<SubscriptionId, Sub>,
    registered: BTreeSet<ChannelPath>,
}

struct Sub {
    prefix: ChannelPath,
    delivered: DeliveredPaths,
}

impl Connection {
    fn new(addr: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            addr,
            subs: FxHashMap::default(),
            registered: BTreeSet::new(),
        }
    }

    /// Start `sub_id` on `prefix`; returns the current values to send.
    fn subscribe(&mut self, sub_id: SubscriptionId, prefix: ChannelPath, shared: &Shared) -> Vec<RelayFrame> {
        let mut delivered = DeliveredPaths::default();
        let frames = delivered
            .resync(shared.entries_under(&prefix))
            .into_iter()
            .map(|event| RelayFrame::Event { sub_id, event })
            .collect();
        self.subs.insert(sub_id, Sub { prefix, delivered });
        frames
    }

    /// Route one broadcast event to the matching subscriptions.
    fn route(&mut self, event: &ChannelEvent) -> Vec<RelayFrame> {
        let mut frames = Vec::new();
        for (sub_id, sub) in self.subs.iter_mut() {
            if event.path().is_under(&sub.prefix) {
                sub.delivered.observe(event);
                frames.push(RelayFrame::Event { sub_id: *sub_id, event: event.clone() });
            }
        }
        frames
    }

    /// Bring every subscription back in line after missed broadcasts.
    fn resync(&mut self, shared: &Shared) -> Vec<RelayFrame> {
        let mut frames = Vec::new();
        for (sub_id, sub) in self.subs.iter_mut() {
            let events = sub.delivered.resync(shared.entries_under(&sub.prefix));
            frames.extend(events.into_iter().map(|event| RelayFrame::Event { sub_id: *sub_id, event }));
        }
        frames
    }
}

pub struct RelayServer {
    config: RelayConfig,
    shared: Arc<Shared>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let (events, _) = broadcast::channel(config.broadcast_capacity.max(1));
        Self {
            config,
            shared: Arc::new(Shared {
                values: Mutex::new(BTreeMap::new()),
                events,
                stats: RwLock::new(RelayStats::default()),
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let shared = self.shared.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, shared).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    pub async fn stats(&self) -> RelayStats {
        self.shared.stats.read().await.clone()
    }

    /// Number of live paths.
    pub fn path_count(&self) -> usize {
        lock(&self.shared.values).len()
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        shared: Arc<Shared>,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let mut conn = Connection::new(addr);
        log::info!("Relay connection {} established from {addr}", conn.id);

        {
            let mut s = shared.stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let result = Self::pump(ws_stream, &mut conn, &shared).await;

        // Cleanup runs whatever ended the pump.
        let mut removed = 0;
        for path in &conn.registered {
            if shared.remove(path) {
                removed += 1;
            }
        }
        {
            let mut s = shared.stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
            s.disconnect_removals += removed;
        }
        log::info!(
            "Relay connection {} from {} closed, removed {removed} paths",
            conn.id,
            conn.addr
        );
        result
    }

    async fn pump(
        ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
        conn: &mut Connection,
        shared: &Shared,
    ) -> Result<(), BoxError> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let mut events = shared.events.subscribe();

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            {
                                let mut s = shared.stats.write().await;
                                s.total_frames += 1;
                                s.total_bytes += bytes.len() as u64;
                            }
                            let frame = match RelayFrame::decode(&bytes) {
                                Ok(frame) => frame,
                                Err(e) => {
                                    log::warn!("Failed to decode frame from {}: {e}", conn.addr);
                                    continue;
                                }
                            };
                            match frame {
                                RelayFrame::Set { path, value } => {
                                    log::trace!("{} set {path}", conn.id);
                                    shared.set(path, value);
                                }
                                RelayFrame::Remove { path } => {
                                    shared.remove(&path);
                                }
                                RelayFrame::Subscribe { sub_id, prefix } => {
                                    log::debug!("{} subscribed {sub_id} to {prefix}", conn.id);
                                    for frame in conn.subscribe(sub_id, prefix, shared) {
                                        ws_sender.send(Message::Binary(frame.encode()?.into())).await?;
                                    }
                                }
                                RelayFrame::Unsubscribe { sub_id } => {
                                    conn.subs.remove(&sub_id);
                                }
                                RelayFrame::OnDisconnectRemove { path } => {
                                    conn.registered.insert(path);
                                }
                                RelayFrame::Ping => {
                                    ws_sender.send(Message::Binary(RelayFrame::Pong.encode()?.into())).await?;
                                }
                                RelayFrame::Event { .. } | RelayFrame::Pong => {
                                    log::debug!("Ignoring server-bound frame from {}", conn.addr);
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::debug!("Connection closed from {}", conn.addr);
                            return Ok(());
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {}: {e}", conn.addr);
                            return Ok(());
                        }

                        _ => {}
                    }
                }

                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            for frame in conn.route(&event) {
                                ws_sender.send(Message::Binary(frame.encode()?.into())).await?;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("Connection {} lagged by {n} events; resyncing", conn.id);
                            for frame in conn.resync(shared) {
                                ws_sender.send(Message::Binary(frame.encode()?.into())).await?;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => return Ok(()),
                    }
                }
            }
        }
    }
}
