//! Standalone ephemeral relay for Easel boards.
//!
//! ```text
//! easel-relay [config.toml]
//! ```
//!
//! Without a config file the relay binds `127.0.0.1:9191`. Log output is
//! controlled with `RUST_LOG`.

use easel_collab::config::load_toml;
use easel_collab::relay::{RelayConfig, RelayServer};
use log::info;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading relay config from {path}");
            load_toml::<RelayConfig>(&path)?
        }
        None => RelayConfig::default(),
    };

    info!("Starting Easel relay...");
    RelayServer::new(config).run().await
}
