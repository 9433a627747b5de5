//! WebSocket relay for the ephemeral channel.
//!
//! ```text
//! RelayClient ──┐                      ┌── values (path → value)
//!               ├── ws ── RelayServer ─┤
//! RelayClient ──┘                      └── broadcast ──► per-connection
//!                                                        prefix filters
//! ```
//!
//! - [`protocol`] — bincode `RelayFrame`s
//! - [`server`] — accept loop, fan-out, disconnect cleanup
//! - [`client`] — [`EphemeralChannel`](crate::channel::EphemeralChannel) over a socket

pub mod client;
pub mod protocol;
pub mod server;

pub use client::RelayClient;
pub use protocol::{ProtocolError, RelayFrame, SubscriptionId};
pub use server::{RelayConfig, RelayServer, RelayStats};
