//! WebSocket sync server.
//!
//! ```text
//! Client A ──┐                          ┌── RoomManager ── Room (report:7)
//!            ├── SyncServer ── relay ───┤                    ├─ yrs Doc
//! Client B ──┘   (accept loop)          │                    └─ BroadcastGroup
//!                                       └── WorkerHandle ── SaveWorker ── DocumentStore
//! ```
//!
//! One task per connection. Connections for the same subject share a room
//! derived from the route `/<kind>/<id>`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::auth::AccessPolicy;
use crate::relay::{handle_connection, RelayContext, RelayStats};
use crate::storage::DocumentStore;
use crate::worker::WorkerHandle;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Frames a slow connection may fall behind before it is resynced
    pub broadcast_capacity: usize,
    /// How long a closing connection waits for its final save, in milliseconds
    pub flush_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
            flush_timeout_ms: 10_000,
        }
    }
}

pub struct SyncServer {
    config: ServerConfig,
    ctx: Arc<RelayContext>,
}

impl SyncServer {
    pub fn new(
        config: ServerConfig,
        store: Arc<DocumentStore>,
        worker: WorkerHandle,
        policy: Arc<dyn AccessPolicy>,
    ) -> Self {
        let ctx = RelayContext::new(
            store,
            worker,
            policy,
            config.broadcast_capacity,
            Duration::from_millis(config.flush_timeout_ms),
        );
        Self {
            config,
            ctx: Arc::new(ctx),
        }
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), std::io::Error> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, ctx).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Bind `addr` (port 0 picks a free one) and serve in the background.
    pub async fn spawn(self, addr: &str) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        log::info!("Sync server listening on {local}");
        let task = tokio::spawn(async move {
            if let Err(e) = self.serve(listener).await {
                log::error!("Sync server stopped: {e}");
            }
        });
        Ok((local, task))
    }

    pub fn stats(&self) -> RelayStats {
        self.ctx.stats()
    }

    pub fn context(&self) -> Arc<RelayContext> {
        self.ctx.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
