//! Process configuration, read from one JSON file.
//!
//! ```json
//! {
//!   "server": {"bind_addr": "0.0.0.0:9090"},
//!   "store": {"path": "/var/lib/quill"},
//!   "worker": {"debounce_ms": 1000},
//!   "subjects": [{"kind": "report", "fields": [...], "tags": {}}],
//!   "tokens": [{"token": "...", "author": 1}]
//! }
//! ```
//!
//! Every section is optional.

use std::path::Path;

use serde::{Deserialize, Serialize};

use quill_core::{FieldError, SchemaRegistry, SubjectConfig};

use crate::auth::{TokenGrant, TokenTable};
use crate::server::ServerConfig;
use crate::storage::StoreConfig;
use crate::worker::WorkerConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid field declaration: {0}")]
    Schema(#[from] FieldError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollabConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub worker: WorkerConfig,
    pub subjects: Vec<SubjectConfig>,
    pub tokens: Vec<TokenGrant>,
}

impl CollabConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Resolve field declarations; invalid ones fail here, not at first use.
    pub fn schemas(&self) -> Result<SchemaRegistry, ConfigError> {
        Ok(SchemaRegistry::from_config(&self.subjects)?)
    }

    pub fn token_table(&self) -> TokenTable {
        TokenTable::new(self.tokens.iter().cloned())
    }
}
