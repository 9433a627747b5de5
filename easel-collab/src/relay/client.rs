//! Relay client: an [`EphemeralChannel`] over one WebSocket.
//!
//! A writer task drains an outgoing queue so that frames reach the relay in
//! call order; a reader task routes `Event` frames to the matching
//! subscription. Closing the socket (explicitly or by drop) lets the relay
//! run this connection's disconnect removals.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::protocol::{RelayFrame, SubscriptionId};
use crate::channel::{ChannelError, ChannelEvent, ChannelPath, EphemeralChannel, EphemeralValue};
use crate::storage::lock;
use crate::subscription::Subscription;

enum Outgoing {
    Frame(Vec<u8>),
    Close,
}

type Routes = Arc<Mutex<FxHashMap<SubscriptionId, mpsc::UnboundedSender<ChannelEvent>>>>;

pub struct RelayClient {
    url: String,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    routes: Routes,
    next_sub: AtomicU64,
    closed: Arc<AtomicBool>,
}

impl RelayClient {
    /// Connect to a relay at `url` (e.g. `ws://127.0.0.1:9191`).
    pub async fn connect(url: impl Into<String>) -> Result<Self, ChannelError> {
        let url = url.into();
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        log::info!("Connected to relay at {url}");

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();
        let routes: Routes = Arc::new(Mutex::new(FxHashMap::default()));
        let closed = Arc::new(AtomicBool::new(false));

        // Writer task: forward the outgoing queue to the socket
        tokio::spawn(async move {
            while let Some(out) = out_rx.recv().await {
                match out {
                    Outgoing::Frame(data) => {
                        if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                            break;
                        }
                    }
                    Outgoing::Close => {
                        let _ = ws_writer.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        // Reader task: route events to subscriptions
        let reader_routes = routes.clone();
        let reader_closed = closed.clone();
        let pong_tx = out_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        match RelayFrame::decode(&bytes) {
                            Ok(RelayFrame::Event { sub_id, event }) => {
                                let routes = lock(&reader_routes);
                                if let Some(tx) = routes.get(&sub_id) {
                                    let _ = tx.send(event);
                                }
                            }
                            Ok(RelayFrame::Ping) => {
                                if let Ok(pong) = RelayFrame::Pong.encode() {
                                    let _ = pong_tx.send(Outgoing::Frame(pong));
                                }
                            }
                            Ok(_) => {}
                            Err(e) => log::warn!("Dropping undecodable relay frame: {e}"),
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost: end every subscription stream.
            reader_closed.store(true, Ordering::SeqCst);
            lock(&reader_routes).clear();
            log::info!("Relay connection lost");
        });

        Ok(Self {
            url,
            outgoing: out_tx,
            routes,
            next_sub: AtomicU64::new(1),
            closed,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of live subscription routes.
    pub fn route_count(&self) -> usize {
        lock(&self.routes).len()
    }

    /// Ask the relay for a `Pong`.
    pub fn ping(&self) -> Result<(), ChannelError> {
        self.send(&RelayFrame::Ping)
    }

    fn send(&self, frame: &RelayFrame) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        let bytes = frame.encode().map_err(|e| ChannelError::Encode(e.to_string()))?;
        self.outgoing
            .send(Outgoing::Frame(bytes))
            .map_err(|_| ChannelError::Closed)
    }
}

#[async_trait]
impl EphemeralChannel for RelayClient {
    async fn set(&self, path: &ChannelPath, value: EphemeralValue) -> Result<(), ChannelError> {
        self.send(&RelayFrame::Set {
            path: path.clone(),
            value,
        })
    }

    async fn remove(&self, path: &ChannelPath) -> Result<(), ChannelError> {
        self.send(&RelayFrame::Remove { path: path.clone() })
    }

    async fn subscribe(&self, prefix: &ChannelPath) -> Result<Subscription<ChannelEvent>, ChannelError> {
        let sub_id = self.next_sub.fetch_add(1, Ordering::SeqCst);
        let routes = self.routes.clone();
        let outgoing = self.outgoing.clone();
        let (tx, sub) = Subscription::channel(move || {
            lock(&routes).remove(&sub_id);
            if let Ok(bytes) = (RelayFrame::Unsubscribe { sub_id }).encode() {
                let _ = outgoing.send(Outgoing::Frame(bytes));
            }
        });
        // Route first so the relay's initial values have somewhere to land.
        lock(&self.routes).insert(sub_id, tx);
        if let Err(e) = self.send(&RelayFrame::Subscribe {
            sub_id,
            prefix: prefix.clone(),
        }) {
            lock(&self.routes).remove(&sub_id);
            return Err(e);
        }
        Ok(sub)
    }

    async fn on_disconnect_remove(&self, path: &ChannelPath) -> Result<(), ChannelError> {
        self.send(&RelayFrame::OnDisconnectRemove { path: path.clone() })
    }

    async fn disconnect(&self) -> Result<(), ChannelError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.outgoing.send(Outgoing::Close);
            log::info!("Disconnecting from relay at {}", self.url);
        }
        Ok(())
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.outgoing.send(Outgoing::Close);
        }
    }
}
