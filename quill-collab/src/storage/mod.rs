//! Persistent storage for subjects.
//!
//! ```text
//! ┌──────────────┐   buffered updates   ┌──────────────────────────────────┐
//! │ SaveWorker   │ ───────────────────► │ DocumentStore (TransactionDB)    │
//! └──────────────┘                      │ CF "documents"    : doc state    │
//!                                       │ CF "history"      : change log   │
//! ┌──────────────┐   replay / list      │ CF "history_index": id → subject │
//! │ changes      │ ◄─────────────────── │ CF "shadow"       : columns      │
//! └──────────────┘                      │ CF "parked"       : pending      │
//!                                       │ CF "meta"         : id sequence  │
//!                                       └──────────────────────────────────┘
//! ```

pub mod history;
pub mod rocks;

pub use history::{apply_update, HistoryEntry};
pub use rocks::{DocumentStore, PersistOutcome, StoreConfig, StoreError};
