//! # easel-collab — Live sync layer for Easel boards
//!
//! Connects the sans-IO board model in `easel-core` to a durable document
//! store and an ephemeral key/value channel, and drives it on tokio.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  put/delete   ┌──────────────┐
//! │ BoardSession │ ────────────► │ DurableStore │  RocksStore / MemoryStore
//! │ (per user)   │ ◄──────────── │              │
//! └──────┬───────┘   snapshots   └──────────────┘
//!        │
//!        │ throttled set/remove  ┌──────────────────┐     WebSocket    ┌─────────────┐
//!        └─────────────────────► │ EphemeralChannel │ ◄──────────────► │ RelayServer │
//!          events ◄───────────── │ RelayClient /    │   bincode frames │ (fan-out)   │
//!                                │ MemoryChannel    │                  └─────────────┘
//!                                └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`session`] — One user's live board: mutations, gestures, undo, view
//! - [`throttle`] — Per-stream throttled publisher for ephemeral writes
//! - [`presence`] — Online users, remote cursors, user colors
//! - [`channel`] — Ephemeral paths, records and the channel trait
//! - [`storage`] — Durable store trait with RocksDB and in-memory backends
//! - [`relay`] — WebSocket relay server and client
//! - [`memory`] — In-process ephemeral hub
//! - [`clock`] — Millisecond clocks
//! - [`config`] — TOML config loading

pub mod channel;
pub mod clock;
pub mod config;
pub mod memory;
pub mod presence;
pub mod relay;
pub mod session;
pub mod storage;
pub mod subscription;
pub mod throttle;

// Re-exports for convenience
pub use channel::{
    ChannelError, ChannelEvent, ChannelPath, CursorRecord, DragRecord, EphemeralChannel,
    EphemeralValue, PresenceRecord, SelectionRecord, StreamKind,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_toml, ConfigError};
pub use memory::{MemoryChannel, MemoryHub};
pub use presence::{PresenceConfig, PresenceTracker, RemoteCursor, UserColor, UserPresence};
pub use relay::{RelayClient, RelayConfig, RelayServer, RelayStats};
pub use session::{BoardSession, SessionConfig, SessionError, SessionView, ViewState};
pub use storage::{DurableStore, MemoryStore, RocksStore, StoreConfig, StoreError};
pub use subscription::Subscription;
pub use throttle::{ThrottleConfig, ThrottledPublisher, Visibility};
