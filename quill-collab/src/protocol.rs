//! Binary frames exchanged with editors.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬───────────┬──────────┐
//! │ msg_type │ origin    │ payload  │
//! │ 1 byte   │ 16 bytes  │ variable │
//! └──────────┴───────────┴──────────┘
//! ```
//!
//! `origin` is the connection that produced the payload (nil for the
//! server). Payloads are `yrs` v1 encodings: a state vector for
//! `SyncStep1`, an update for `SyncStep2` and `Update`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message types for the sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// State vector; the receiver answers with what the sender is missing
    SyncStep1 = 1,
    /// State diff answering a `SyncStep1`
    SyncStep2 = 2,
    /// Incremental update
    Update = 3,
    Ping = 4,
    Pong = 5,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub msg_type: MessageType,
    pub origin: Uuid,
    pub payload: Vec<u8>,
}

impl SyncMessage {
    pub fn sync_step1(origin: Uuid, state_vector: Vec<u8>) -> Self {
        Self {
            msg_type: MessageType::SyncStep1,
            origin,
            payload: state_vector,
        }
    }

    pub fn sync_step2(origin: Uuid, state_diff: Vec<u8>) -> Self {
        Self {
            msg_type: MessageType::SyncStep2,
            origin,
            payload: state_diff,
        }
    }

    pub fn update(origin: Uuid, update: Vec<u8>) -> Self {
        Self {
            msg_type: MessageType::Update,
            origin,
            payload: update,
        }
    }

    pub fn ping(origin: Uuid) -> Self {
        Self {
            msg_type: MessageType::Ping,
            origin,
            payload: Vec::new(),
        }
    }

    pub fn pong(origin: Uuid) -> Self {
        Self {
            msg_type: MessageType::Pong,
            origin,
            payload: Vec::new(),
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(msg)
    }

    /// Whether this frame carries document content.
    pub fn carries_update(&self) -> bool {
        matches!(self.msg_type, MessageType::SyncStep2 | MessageType::Update)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
}
