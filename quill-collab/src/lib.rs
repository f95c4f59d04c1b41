//! # quill-collab: live editing and durable history for subjects
//!
//! ```text
//! ┌─────────────┐  WebSocket   ┌──────────────┐  doc_updated   ┌────────────┐
//! │ editor      │ ◄──────────► │ relay (Room) │ ─────────────► │ SaveWorker │
//! │ (yrs Doc)   │  SyncMessage │ yrs Doc      │  doc_flush     │ (debounce) │
//! └─────────────┘              │ Broadcast    │                └─────┬──────┘
//!                              └──────────────┘                      │
//!                                                                    ▼
//!                    ┌─────────┐  replay   ┌──────────────────────────────┐
//!                    │ changes │ ◄──────── │ DocumentStore (RocksDB)      │
//!                    └─────────┘           │ documents, history, shadow   │
//!                                          └──────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: binary wire format (bincode-encoded `SyncMessage`)
//! - [`relay`]: per-connection state machine
//! - [`room`] / [`broadcast`]: shared documents and fan-out per subject
//! - [`worker`]: debounced, per-connection saves
//! - [`storage`]: RocksDB subject store and history log
//! - [`changes`]: human-readable history

pub mod auth;
pub mod broadcast;
pub mod changes;
pub mod config;
pub mod protocol;
pub mod relay;
pub mod room;
pub mod server;
pub mod storage;
pub mod subject;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{AccessPolicy, TokenGrant, TokenTable};
pub use broadcast::{BroadcastGroup, Frame};
pub use changes::{render_entry, render_history, EntryDiff};
pub use config::{CollabConfig, ConfigError};
pub use protocol::{MessageType, ProtocolError, SyncMessage};
pub use relay::{RelayContext, RelayError, RelayState, RelayStats, NOT_FOUND_CLOSE_CODE};
pub use room::{Room, RoomManager};
pub use server::{ServerConfig, SyncServer};
pub use storage::{
    apply_update, DocumentStore, HistoryEntry, PersistOutcome, StoreConfig, StoreError,
};
pub use subject::{AuthorId, SubjectRef};
pub use worker::{ConnectionId, DocUpdated, FlushOutcome, SaveWorker, WorkerConfig, WorkerHandle};
