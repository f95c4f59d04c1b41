//! RocksDB-backed subject store.
//!
//! Column families:
//! - `documents`    : full `yrs` document state per subject (LZ4 compressed)
//! - `history`      : history entries keyed by `subject key + id`
//! - `history_index`: `id -> subject key`, for id lookups and sequence recovery
//! - `shadow`       : shadow columns keyed by `subject key + column` (JSON)
//! - `parked`       : updates a document holds but cannot integrate yet,
//!                    because edits they build on have not been saved
//! - `meta`         : the history id sequence
//!
//! Every mutation of a subject runs inside one RocksDB transaction that first
//! takes an exclusive lock on the subject's `documents` row. That lock is the
//! only thing serializing concurrent saves of the same subject.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, Direction, IteratorMode,
    Options, SingleThreaded, Transaction, TransactionDB, TransactionDBOptions, TransactionOptions,
    WriteOptions,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{DeleteSet, Doc, ReadTxn, StateVector, Transact, Update};

use quill_core::{duplicate_document, CopyError, FieldError, ShadowRow, SubjectSchema};

use super::history::HistoryEntry;
use crate::subject::{AuthorId, SubjectRef};

pub(super) const CF_DOCUMENTS: &str = "documents";
pub(super) const CF_HISTORY: &str = "history";
pub(super) const CF_HISTORY_INDEX: &str = "history_index";
pub(super) const CF_SHADOW: &str = "shadow";
const CF_PARKED: &str = "parked";
const CF_META: &str = "meta";

const COLUMN_FAMILIES: &[&str] = &[
    CF_DOCUMENTS,
    CF_HISTORY,
    CF_HISTORY_INDEX,
    CF_SHADOW,
    CF_PARKED,
    CF_META,
];

const HISTORY_SEQ_KEY: &[u8] = b"next_history_id";

pub(super) type Txn<'a> = Transaction<'a, TransactionDB<SingleThreaded>>;

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 256MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync every committed transaction (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 64MB)
    pub write_buffer_size: usize,
    /// How long a save waits for another save's row lock, in milliseconds
    pub lock_timeout_ms: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("quill_data"),
            block_cache_size: 256 * 1024 * 1024, // 256MB
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 64 * 1024 * 1024, // 64MB
            lock_timeout_ms: 5_000,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024, // 8MB
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024, // 4MB
            lock_timeout_ms: 5_000,
        }
    }
}

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("subject not found: {0}")]
    NotFound(SubjectRef),
    #[error("subject already exists: {0}")]
    AlreadyExists(SubjectRef),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("compression error: {0}")]
    Compression(String),
    #[error("malformed document state: {0}")]
    Document(String),
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error(transparent)]
    Copy(#[from] CopyError),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Result of saving buffered updates into a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The updates were already part of the stored state; nothing was written.
    Unchanged,
    /// State changed and history entry `history_id` was appended.
    Saved { history_id: u64 },
    /// The updates build on edits the store has not seen yet. They were
    /// parked with the document and integrate on a later save.
    Deferred,
    /// The subject was deleted before the save ran.
    SubjectMissing,
}

pub struct DocumentStore {
    pub(super) db: TransactionDB<SingleThreaded>,
    config: StoreConfig,
}

impl DocumentStore {
    /// Open the store, creating the database and column families if missing.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.set_max_total_wal_size(128 * 1024 * 1024);
        db_opts.increase_parallelism(num_cpus());

        let mut txn_db_opts = TransactionDBOptions::default();
        txn_db_opts.set_txn_lock_timeout(config.lock_timeout_ms);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = TransactionDB::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &txn_db_opts,
            &config.path,
            cf_descriptors,
        )?;

        let store = Self { db, config };
        log::info!(
            "Opened subject store at {} (next history id {})",
            store.config.path.display(),
            store.next_history_id()?
        );
        Ok(store)
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_DOCUMENTS => {
                opts.set_max_write_buffer_number(2);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_HISTORY => {
                // Append-heavy, range-scanned per subject
                opts.set_max_write_buffer_number(4);
            }
            CF_HISTORY_INDEX => {
                opts.set_max_write_buffer_number(2);
                opts.set_compression_type(DBCompressionType::None);
            }
            CF_SHADOW | CF_PARKED => {
                opts.set_max_write_buffer_number(2);
            }
            CF_META => {
                opts.set_compression_type(DBCompressionType::None);
            }
            _ => {}
        }

        opts
    }

    /// One past the highest id in `history_index`. Used when the sequence
    /// row has never been written.
    fn recover_history_seq(&self) -> Result<u64, StoreError> {
        let cf = self.cf(CF_HISTORY_INDEX)?;
        let mut iter = self.db.iterator_cf(cf, IteratorMode::End);
        match iter.next() {
            Some(item) => {
                let (key, _) = item?;
                Ok(decode_id(&key)? + 1)
            }
            None => Ok(1),
        }
    }

    // ─── Subjects ─────────────────────────────────────────────────────

    pub fn subject_exists(&self, subject: &SubjectRef) -> Result<bool, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        Ok(self.db.get_cf(cf, subject.storage_key())?.is_some())
    }

    /// Load the authoritative document of a subject, parked updates included.
    pub fn load_document(&self, subject: &SubjectRef) -> Result<Doc, StoreError> {
        let key = subject.storage_key();
        let Some(compressed) = self.db.get_cf(self.cf(CF_DOCUMENTS)?, &key)? else {
            return Err(StoreError::NotFound(subject.clone()));
        };
        let parked = self.db.get_cf(self.cf(CF_PARKED)?, &key)?;
        decode_document(&compressed, parked.as_deref())
    }

    /// Create a subject with a fresh document holding the schema's defaults.
    ///
    /// The creation history entry carries the whole initial state, so replay
    /// from an empty document reproduces every later state.
    pub fn create_subject(
        &self,
        subject: &SubjectRef,
        schema: &SubjectSchema,
        author: Option<AuthorId>,
    ) -> Result<u64, StoreError> {
        let doc = Doc::new();
        schema.initialize(&doc)?;
        self.insert_subject(subject, &doc, schema, author)
    }

    /// Create `target` with a deep copy of every top-level entry `schema`
    /// declares on `source`.
    pub fn duplicate_subject(
        &self,
        source: &SubjectRef,
        target: &SubjectRef,
        schema: &SubjectSchema,
        author: Option<AuthorId>,
    ) -> Result<u64, StoreError> {
        let source_doc = self.load_document(source)?;
        let doc = duplicate_document(&source_doc, &schema.top_level_entries())?;
        log::debug!("Duplicating {source} into {target}");
        self.insert_subject(target, &doc, schema, author)
    }

    fn insert_subject(
        &self,
        subject: &SubjectRef,
        doc: &Doc,
        schema: &SubjectSchema,
        author: Option<AuthorId>,
    ) -> Result<u64, StoreError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let key = subject.storage_key();

        let txn = self.begin();
        if txn.get_for_update_cf(cf_docs, &key, true)?.is_some() {
            txn.rollback()?;
            return Err(StoreError::AlreadyExists(subject.clone()));
        }

        let (state, before, after) = {
            let read = doc.transact();
            let state = read.encode_state_as_update_v1(&StateVector::default());
            (state, schema.before_persist(&read), schema.after_persist(&read))
        };

        txn.put_cf(cf_docs, &key, lz4_flex::compress_prepend_size(&state))?;
        self.write_shadow(&txn, subject, &before)?;
        self.write_shadow(&txn, subject, &after)?;
        let history_id = self.append_history(&txn, subject, author, state)?;
        txn.commit()?;

        log::info!("Created subject {subject} (history {history_id})");
        Ok(history_id)
    }

    /// Delete a subject's document, parked updates and shadow columns.
    /// History is kept.
    pub fn delete_subject(&self, subject: &SubjectRef) -> Result<(), StoreError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let cf_shadow = self.cf(CF_SHADOW)?;
        let key = subject.storage_key();

        let txn = self.begin();
        if txn.get_for_update_cf(cf_docs, &key, true)?.is_none() {
            txn.rollback()?;
            return Err(StoreError::NotFound(subject.clone()));
        }
        txn.delete_cf(cf_docs, &key)?;
        txn.delete_cf(self.cf(CF_PARKED)?, &key)?;
        for column_key in self.prefixed_keys(CF_SHADOW, &key)? {
            txn.delete_cf(cf_shadow, &column_key)?;
        }
        txn.commit()?;

        log::info!("Deleted subject {subject}");
        Ok(())
    }

    // ─── Saving ───────────────────────────────────────────────────────

    /// Apply buffered updates to a subject in one transaction.
    ///
    /// Holds the subject's row lock for the whole save. Updates are applied in
    /// order; malformed ones are logged and skipped.
    ///
    /// An update that builds on edits the store has not seen yet (another
    /// connection's buffer that is still waiting) cannot be integrated. It is
    /// kept in the `parked` row and integrates once a later save supplies
    /// what it is missing. A save that only parks updates writes that row
    /// and nothing else.
    ///
    /// When neither the state nor the parked updates change, the transaction
    /// is rolled back and nothing is written, shadow columns included.
    /// Otherwise the document, the parked row, both shadow rows and one
    /// history entry carrying the aggregate delta are committed together.
    pub fn persist_updates(
        &self,
        subject: &SubjectRef,
        author: Option<AuthorId>,
        updates: &[Vec<u8>],
        schema: &SubjectSchema,
    ) -> Result<PersistOutcome, StoreError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let key = subject.storage_key();

        let txn = self.begin();
        let stored = match txn.get_for_update_cf(cf_docs, &key, true)? {
            Some(stored) => stored,
            None => {
                txn.rollback()?;
                return Ok(PersistOutcome::SubjectMissing);
            }
        };

        let cf_parked = self.cf(CF_PARKED)?;
        let parked = txn.get_cf(cf_parked, &key)?;
        let doc = decode_document(&stored, parked.as_deref())?;
        let (sv_before, snapshot_before, parked_before) = {
            let read = doc.transact();
            (read.state_vector(), read.snapshot(), Parked::of(&read))
        };

        {
            let mut write = doc.transact_mut();
            for (i, bytes) in updates.iter().enumerate() {
                let applied = Update::decode_v1(bytes)
                    .map_err(|e| e.to_string())
                    .and_then(|update| write.apply_update(update).map_err(|e| e.to_string()));
                if let Err(e) = applied {
                    log::warn!("Skipping malformed update {i} for {subject}: {e}");
                }
            }
        }

        let read = doc.transact();
        let parked_after = Parked::of(&read);
        if read.snapshot() == snapshot_before {
            drop(read);
            if parked_after == parked_before {
                txn.rollback()?;
                return Ok(PersistOutcome::Unchanged);
            }
            self.write_parked(&txn, &key, &parked_after)?;
            txn.commit()?;
            log::debug!("Parked updates for {subject} until the edits they build on are saved");
            return Ok(PersistOutcome::Deferred);
        }

        let state = read.encode_state_as_update_v1(&StateVector::default());
        let delta = read.encode_state_as_update_v1(&sv_before);
        let before = schema.before_persist(&read);
        let after = schema.after_persist(&read);
        drop(read);

        txn.put_cf(cf_docs, &key, lz4_flex::compress_prepend_size(&state))?;
        self.write_parked(&txn, &key, &parked_after)?;
        self.write_shadow(&txn, subject, &before)?;
        // after-persist columns see the row already written in this transaction
        self.write_shadow(&txn, subject, &after)?;
        let history_id = self.append_history(&txn, subject, author, delta)?;
        txn.commit()?;

        Ok(PersistOutcome::Saved { history_id })
    }

    fn write_parked(&self, txn: &Txn<'_>, key: &[u8], parked: &Parked) -> Result<(), StoreError> {
        let cf = self.cf(CF_PARKED)?;
        match parked.encode()? {
            Some(update) => txn.put_cf(cf, key, lz4_flex::compress_prepend_size(&update))?,
            None => txn.delete_cf(cf, key)?,
        }
        Ok(())
    }

    // ─── Shadow columns ───────────────────────────────────────────────

    /// Every shadow column stored for a subject.
    pub fn shadow_row(&self, subject: &SubjectRef) -> Result<ShadowRow, StoreError> {
        let cf = self.cf(CF_SHADOW)?;
        let prefix = subject.storage_key();
        let mut row = ShadowRow::new();

        for item in self.db.iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward)) {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let column = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            row.insert(column, decode_json(&value)?);
        }

        Ok(row)
    }

    pub fn shadow_value(&self, subject: &SubjectRef, column: &str) -> Result<Option<Value>, StoreError> {
        let cf = self.cf(CF_SHADOW)?;
        match self.db.get_cf(cf, shadow_key(subject, column))? {
            Some(bytes) => Ok(Some(decode_json(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_shadow(&self, txn: &Txn<'_>, subject: &SubjectRef, row: &ShadowRow) -> Result<(), StoreError> {
        let cf = self.cf(CF_SHADOW)?;
        for (column, value) in row {
            let bytes = serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
            txn.put_cf(cf, shadow_key(subject, column), bytes)?;
        }
        Ok(())
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    pub(super) fn begin(&self) -> Txn<'_> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.transaction_opt(&write_opts, &TransactionOptions::default())
    }

    /// Keys of `cf` starting with `prefix`, in order.
    pub(super) fn prefixed_keys(&self, cf: &'static str, prefix: &[u8]) -> Result<Vec<Box<[u8]>>, StoreError> {
        let handle = self.cf(cf)?;
        let mut keys = Vec::new();
        for item in self.db.iterator_cf(handle, IteratorMode::From(prefix, Direction::Forward)) {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            keys.push(key);
        }
        Ok(keys)
    }

    pub(super) fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Id the next history entry will receive.
    pub fn next_history_id(&self) -> Result<u64, StoreError> {
        match self.db.get_cf(self.cf(CF_META)?, HISTORY_SEQ_KEY)? {
            Some(bytes) => decode_id(&bytes),
            None => self.recover_history_seq(),
        }
    }

    /// Take the next history id inside `txn`.
    ///
    /// The sequence row stays locked until `txn` ends, so ids follow commit
    /// order, and a transaction that rolls back or fails to commit gives
    /// its id back.
    fn allocate_history_id(&self, txn: &Txn<'_>) -> Result<u64, StoreError> {
        let cf = self.cf(CF_META)?;
        let id = match txn.get_for_update_cf(cf, HISTORY_SEQ_KEY, true)? {
            Some(bytes) => decode_id(&bytes)?,
            None => self.recover_history_seq()?,
        };
        txn.put_cf(cf, HISTORY_SEQ_KEY, (id + 1).to_be_bytes())?;
        Ok(id)
    }

    // Called last before commit: the sequence row lock is shared by every subject.
    fn append_history(
        &self,
        txn: &Txn<'_>,
        subject: &SubjectRef,
        author: Option<AuthorId>,
        update: Vec<u8>,
    ) -> Result<u64, StoreError> {
        let id = self.allocate_history_id(txn)?;
        let entry = HistoryEntry::new(id, subject.clone(), author, update);
        self.put_history(txn, &entry)?;
        Ok(id)
    }
}

fn shadow_key(subject: &SubjectRef, column: &str) -> Vec<u8> {
    let mut key = subject.storage_key();
    key.extend_from_slice(column.as_bytes());
    key
}

fn decode_json(bytes: &[u8]) -> Result<Value, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Deserialization(e.to_string()))
}

fn decode_id(bytes: &[u8]) -> Result<u64, StoreError> {
    let buf: [u8; 8] = bytes
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| StoreError::Deserialization(format!("bad history id ({} bytes)", bytes.len())))?;
    Ok(u64::from_be_bytes(buf))
}

/// Rebuild a document from its LZ4-compressed state, then re-apply the
/// parked updates so they wait inside the document again.
fn decode_document(compressed: &[u8], parked: Option<&[u8]>) -> Result<Doc, StoreError> {
    let doc = Doc::new();
    for blob in std::iter::once(compressed).chain(parked) {
        let update = lz4_flex::decompress_size_prepended(blob)
            .map_err(|e| StoreError::Compression(e.to_string()))?;
        super::history::apply_update(&doc, &update)?;
    }
    Ok(doc)
}

/// What a document holds without having integrated it: blocks whose
/// dependencies are missing and deletions of blocks it has not seen.
///
/// `encode_state_as_update_v1` leaves both out, so they are stored apart
/// from the document state.
#[derive(PartialEq)]
struct Parked {
    blocks: Option<Vec<u8>>,
    deletes: Option<DeleteSet>,
}

impl Parked {
    fn of<T: ReadTxn>(txn: &T) -> Self {
        let store = txn.store();
        Self {
            blocks: store.pending_update().map(|pending| pending.update.encode_v1()),
            deletes: store.pending_ds().filter(|ds| !ds.is_empty()).cloned(),
        }
    }

    /// Everything parked as one v1 update, `None` when nothing is.
    fn encode(&self) -> Result<Option<Vec<u8>>, StoreError> {
        let deletes = self.deletes.as_ref().map(|ds| {
            // an update with no blocks (zero clients) followed by the delete set
            let mut update = vec![0u8];
            update.extend(ds.encode_v1());
            update
        });
        match (&self.blocks, deletes) {
            (None, None) => Ok(None),
            (Some(blocks), None) => Ok(Some(blocks.clone())),
            (None, Some(deletes)) => Ok(Some(deletes)),
            (Some(blocks), Some(deletes)) => yrs::merge_updates_v1([blocks.as_slice(), deletes.as_slice()])
                .map(Some)
                .map_err(|e| StoreError::Document(e.to_string())),
        }
    }
}

fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{body_of, dependent_edits, edit_body, report_schema, set_title, temp_store};
    use quill_core::Tags;
    use serde_json::json;

    #[test]
    fn test_create_subject_writes_defaults_and_shadow() {
        let (_dir, store) = temp_store();
        let schema = report_schema();
        let subject = SubjectRef::new("report", 1);

        assert!(!store.subject_exists(&subject).unwrap());
        let id = store.create_subject(&subject, &schema, Some(7)).unwrap();
        assert_eq!(id, 1);
        assert!(store.subject_exists(&subject).unwrap());

        let doc = store.load_document(&subject).unwrap();
        let title = schema.value("title").unwrap();
        assert_eq!(title.get_string(&doc.transact()), "");
        assert_eq!(store.shadow_value(&subject, "stored_title").unwrap(), Some(json!("")));
        assert_eq!(store.shadow_value(&subject, "tag_list").unwrap(), Some(json!([])));

        assert!(matches!(
            store.create_subject(&subject, &schema, None),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_missing_subject() {
        let (_dir, store) = temp_store();
        let subject = SubjectRef::new("report", 404);
        assert!(matches!(store.load_document(&subject), Err(StoreError::NotFound(_))));
        assert_eq!(
            store.persist_updates(&subject, None, &[vec![0, 0]], &report_schema()).unwrap(),
            PersistOutcome::SubjectMissing
        );
    }

    #[test]
    fn test_persist_updates_and_noop() {
        let (_dir, store) = temp_store();
        let schema = report_schema();
        let subject = SubjectRef::new("report", 2);
        store.create_subject(&subject, &schema, None).unwrap();

        let client = store.load_document(&subject).unwrap();
        let update = set_title(&client, &schema, "Draft");

        let outcome = store.persist_updates(&subject, Some(1), &[update.clone()], &schema).unwrap();
        assert_eq!(outcome, PersistOutcome::Saved { history_id: 2 });
        assert_eq!(store.shadow_value(&subject, "stored_title").unwrap(), Some(json!("Draft")));

        // the same update again is already part of the stored state
        let outcome = store.persist_updates(&subject, Some(1), &[update], &schema).unwrap();
        assert_eq!(outcome, PersistOutcome::Unchanged);
        assert_eq!(store.next_history_id().unwrap(), 3);
    }

    #[test]
    fn test_malformed_update_is_skipped() {
        let (_dir, store) = temp_store();
        let schema = report_schema();
        let subject = SubjectRef::new("report", 3);
        store.create_subject(&subject, &schema, None).unwrap();

        let client = store.load_document(&subject).unwrap();
        let good = set_title(&client, &schema, "Kept");
        let outcome = store
            .persist_updates(&subject, None, &[vec![0xff, 0x01, 0x02], good], &schema)
            .unwrap();
        assert!(matches!(outcome, PersistOutcome::Saved { .. }));

        let doc = store.load_document(&subject).unwrap();
        assert_eq!(schema.value("title").unwrap().get_string(&doc.transact()), "Kept");
    }

    #[test]
    fn test_delete_only_update_is_a_change() {
        let (_dir, store) = temp_store();
        let schema = report_schema();
        let subject = SubjectRef::new("report", 4);
        store.create_subject(&subject, &schema, None).unwrap();

        let client = store.load_document(&subject).unwrap();
        let added = {
            let sv = client.transact().state_vector();
            let mut txn = client.transact_mut();
            Tags::get_or_insert(&mut txn).insert(&mut txn, "urgent");
            drop(txn);
            client.transact().encode_state_as_update_v1(&sv)
        };
        store.persist_updates(&subject, None, &[added], &schema).unwrap();

        let removed = {
            let sv = client.transact().state_vector();
            let mut txn = client.transact_mut();
            let tags = Tags::get_or_insert(&mut txn);
            assert!(tags.remove(&mut txn, "urgent"));
            drop(txn);
            client.transact().encode_state_as_update_v1(&sv)
        };
        let outcome = store.persist_updates(&subject, None, &[removed], &schema).unwrap();
        assert!(matches!(outcome, PersistOutcome::Saved { .. }));
        assert_eq!(store.shadow_value(&subject, "tag_list").unwrap(), Some(json!([])));
    }

    #[test]
    fn test_delete_subject_keeps_history() {
        let (_dir, store) = temp_store();
        let schema = report_schema();
        let subject = SubjectRef::new("report", 5);
        store.create_subject(&subject, &schema, None).unwrap();

        store.delete_subject(&subject).unwrap();
        assert!(!store.subject_exists(&subject).unwrap());
        assert!(store.shadow_row(&subject).unwrap().is_empty());
        assert_eq!(store.history_for(&subject, false).unwrap().len(), 1);
        assert!(matches!(store.delete_subject(&subject), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_duplicate_subject() {
        let (_dir, store) = temp_store();
        let schema = report_schema();
        let source = SubjectRef::new("report", 6);
        let target = SubjectRef::new("report", 60);
        store.create_subject(&source, &schema, None).unwrap();
        let client = store.load_document(&source).unwrap();
        let update = set_title(&client, &schema, "Original");
        store.persist_updates(&source, None, &[update], &schema).unwrap();

        store.duplicate_subject(&source, &target, &schema, Some(3)).unwrap();
        let copy = store.load_document(&target).unwrap();
        assert_eq!(schema.value("title").unwrap().get_string(&copy.transact()), "Original");
        assert_eq!(store.shadow_value(&target, "stored_title").unwrap(), Some(json!("Original")));
    }

    #[test]
    fn test_history_sequence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let schema = report_schema();
        {
            let store = DocumentStore::open(StoreConfig::for_testing(dir.path())).unwrap();
            store.create_subject(&SubjectRef::new("report", 1), &schema, None).unwrap();
            store.create_subject(&SubjectRef::new("report", 2), &schema, None).unwrap();
        }
        let store = DocumentStore::open(StoreConfig::for_testing(dir.path())).unwrap();
        assert_eq!(store.next_history_id().unwrap(), 3);
    }

    #[test]
    fn test_update_saved_before_its_dependency_is_parked() {
        let (_dir, store) = temp_store();
        let schema = report_schema();
        let subject = SubjectRef::new("report", 9);
        store.create_subject(&subject, &schema, None).unwrap();
        let (hello, world) = dependent_edits(&store, &subject);

        // B's buffer reaches the store first
        let outcome = store.persist_updates(&subject, Some(2), &[world], &schema).unwrap();
        assert_eq!(outcome, PersistOutcome::Deferred);
        assert_eq!(store.history_for(&subject, false).unwrap().len(), 1);
        assert_eq!(body_of(&store.load_document(&subject).unwrap()), "");

        let outcome = store.persist_updates(&subject, Some(1), &[hello], &schema).unwrap();
        assert_eq!(outcome, PersistOutcome::Saved { history_id: 2 });
        assert_eq!(body_of(&store.load_document(&subject).unwrap()), "Hello world");

        // replay reaches the same text through entry 2 alone
        let replayed = store.replay(&subject, 2, true).unwrap();
        assert_eq!(body_of(&replayed), "Hello world");
    }

    #[test]
    fn test_deletion_of_unsaved_text_is_parked() {
        let (_dir, store) = temp_store();
        let schema = report_schema();
        let subject = SubjectRef::new("report", 10);
        store.create_subject(&subject, &schema, None).unwrap();

        let a = store.load_document(&subject).unwrap();
        let b = store.load_document(&subject).unwrap();
        let typo = edit_body(&a, |txn, body| body.insert(txn, 0, "typo"));
        crate::storage::apply_update(&b, &typo).unwrap();
        let removed = edit_body(&b, |txn, body| body.remove_range(txn, 0, 4));

        let outcome = store.persist_updates(&subject, None, &[removed], &schema).unwrap();
        assert_eq!(outcome, PersistOutcome::Deferred);

        let outcome = store.persist_updates(&subject, None, &[typo], &schema).unwrap();
        assert!(matches!(outcome, PersistOutcome::Saved { .. }));
        assert_eq!(body_of(&store.load_document(&subject).unwrap()), "");
    }

    #[test]
    fn test_rolled_back_save_gives_its_history_id_back() {
        let (_dir, store) = temp_store();
        let schema = report_schema();
        let subject = SubjectRef::new("report", 11);
        store.create_subject(&subject, &schema, None).unwrap();

        let txn = store.begin();
        assert_eq!(store.append_history(&txn, &subject, None, Vec::new()).unwrap(), 2);
        txn.rollback().unwrap();
        drop(txn);

        assert_eq!(store.next_history_id().unwrap(), 2);
        let id = store.create_subject(&SubjectRef::new("report", 12), &schema, None).unwrap();
        assert_eq!(id, 2);
        assert_eq!(store.next_history_id().unwrap(), 3);
    }
}
