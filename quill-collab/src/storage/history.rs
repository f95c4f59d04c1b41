//! Append-only change log.
//!
//! Key format in `history`: `<subject key><id:8 bytes BE>`, so one prefix
//! scan returns a subject's entries in id order. `history_index` maps the
//! bare id back to its subject key.

use rocksdb::{Direction, IteratorMode};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use yrs::updates::decoder::Decode;
use yrs::{Doc, Transact, Update};

use super::rocks::{DocumentStore, StoreError, Txn, CF_HISTORY, CF_HISTORY_INDEX};
use crate::subject::{AuthorId, SubjectRef};

/// One durable save of a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: u64,
    pub subject: SubjectRef,
    pub author: Option<AuthorId>,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    /// `yrs` v1 update: the difference between the state before and after
    /// the save (the full state for the creation entry)
    pub update: Vec<u8>,
}

impl HistoryEntry {
    pub fn new(id: u64, subject: SubjectRef, author: Option<AuthorId>, update: Vec<u8>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            id,
            subject,
            author,
            timestamp,
            update,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        let bytes = bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(lz4_flex::compress_prepend_size(&bytes))
    }

    fn decode(compressed: &[u8]) -> Result<Self, StoreError> {
        let bytes = lz4_flex::decompress_size_prepended(compressed)
            .map_err(|e| StoreError::Compression(e.to_string()))?;
        let (entry, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(entry)
    }
}

/// Apply a v1 update to `doc` in its own transaction.
pub fn apply_update(doc: &Doc, update: &[u8]) -> Result<(), StoreError> {
    let update = Update::decode_v1(update).map_err(|e| StoreError::Document(e.to_string()))?;
    doc.transact_mut()
        .apply_update(update)
        .map_err(|e| StoreError::Document(e.to_string()))
}

fn history_key(subject: &SubjectRef, id: u64) -> Vec<u8> {
    let mut key = subject.storage_key();
    key.extend_from_slice(&id.to_be_bytes());
    key
}

impl DocumentStore {
    /// Write `entry` as part of `txn`.
    pub(super) fn put_history(&self, txn: &Txn<'_>, entry: &HistoryEntry) -> Result<(), StoreError> {
        let cf_history = self.cf(CF_HISTORY)?;
        let cf_index = self.cf(CF_HISTORY_INDEX)?;
        txn.put_cf(cf_history, history_key(&entry.subject, entry.id), entry.encode()?)?;
        txn.put_cf(cf_index, entry.id.to_be_bytes(), entry.subject.storage_key())?;
        Ok(())
    }

    /// Entries of a subject ordered by id, oldest first unless `recent_first`.
    pub fn history_for(&self, subject: &SubjectRef, recent_first: bool) -> Result<Vec<HistoryEntry>, StoreError> {
        let cf = self.cf(CF_HISTORY)?;
        let prefix = subject.storage_key();
        let mut entries = Vec::new();

        for item in self.db.iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward)) {
            let (key, value) = item?;
            if key.len() != prefix.len() + 8 || !key.starts_with(&prefix) {
                break;
            }
            entries.push(HistoryEntry::decode(&value)?);
        }

        if recent_first {
            entries.reverse();
        }
        Ok(entries)
    }

    /// Look up an entry by id alone.
    pub fn history_entry(&self, id: u64) -> Result<Option<HistoryEntry>, StoreError> {
        let cf_index = self.cf(CF_HISTORY_INDEX)?;
        let cf_history = self.cf(CF_HISTORY)?;

        let Some(subject_key) = self.db.get_cf(cf_index, id.to_be_bytes())? else {
            return Ok(None);
        };
        let mut key = subject_key;
        key.extend_from_slice(&id.to_be_bytes());
        match self.db.get_cf(cf_history, key)? {
            Some(bytes) => Ok(Some(HistoryEntry::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Rebuild a subject's document from an empty one by applying, in id
    /// order, every entry with id up to `until` (excluding `until` itself
    /// unless `inclusive`).
    pub fn replay(&self, subject: &SubjectRef, until: u64, inclusive: bool) -> Result<Doc, StoreError> {
        let doc = Doc::new();
        for entry in self.history_for(subject, false)? {
            if entry.id > until || (!inclusive && entry.id == until) {
                break;
            }
            apply_update(&doc, &entry.update)?;
        }
        Ok(doc)
    }

    /// The document as it was right before `history_id`, paired with that
    /// entry. `None` when the subject has no such entry.
    pub fn replay_until(
        &self,
        subject: &SubjectRef,
        history_id: u64,
    ) -> Result<Option<(Doc, HistoryEntry)>, StoreError> {
        let cf = self.cf(CF_HISTORY)?;
        let Some(bytes) = self.db.get_cf(cf, history_key(subject, history_id))? else {
            return Ok(None);
        };
        let entry = HistoryEntry::decode(&bytes)?;
        let doc = self.replay(subject, history_id, false)?;
        Ok(Some((doc, entry)))
    }
}
