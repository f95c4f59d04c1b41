use serde_json::Value;
use yrs::{Doc, Map, MapRef, ReadTxn, Transaction, TransactionMut, WriteTxn};

use super::{DocField, ShadowRow, ValueKind};
use crate::diff::{HistoryObserver, TagsObserver};

/// Top-level map holding the tag set as `name -> true`.
pub const TAGS_KEY: &str = "tags";

/// Set-like view over the tags map.
#[derive(Debug, Clone)]
pub struct Tags {
    map: MapRef,
}

impl Tags {
    pub fn get<T: ReadTxn>(txn: &T) -> Option<Self> {
        txn.get_map(TAGS_KEY).map(|map| Self { map })
    }

    pub fn get_or_insert(txn: &mut TransactionMut<'_>) -> Self {
        Self {
            map: txn.get_or_insert_map(TAGS_KEY),
        }
    }

    pub fn insert(&self, txn: &mut TransactionMut<'_>, tag: &str) {
        self.map.insert(txn, tag, true);
    }

    /// Returns whether the tag was present.
    pub fn remove(&self, txn: &mut TransactionMut<'_>, tag: &str) -> bool {
        self.map.remove(txn, tag).is_some()
    }

    pub fn contains<T: ReadTxn>(&self, txn: &T, tag: &str) -> bool {
        self.map.contains_key(txn, tag)
    }

    /// Tag names in lexicographic order.
    pub fn names<T: ReadTxn>(&self, txn: &T) -> Vec<String> {
        let mut names: Vec<String> = self.map.keys(txn).map(str::to_string).collect();
        names.sort();
        names
    }
}

/// Sorted tag names, empty when the document has no tags yet.
pub(crate) fn tag_names<T: ReadTxn>(txn: &T) -> Vec<String> {
    Tags::get(txn).map(|tags| tags.names(txn)).unwrap_or_default()
}

/// The tags field. Its shadow copy needs the subject row to exist, so it is
/// written after persist.
#[derive(Debug, Clone)]
pub struct TagsField {
    verbose_name: String,
    column: Option<String>,
}

impl TagsField {
    pub fn new() -> Self {
        Self {
            verbose_name: "Tags".to_string(),
            column: None,
        }
    }

    pub fn with_verbose_name(mut self, verbose_name: impl Into<String>) -> Self {
        self.verbose_name = verbose_name.into();
        self
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }
}

impl Default for TagsField {
    fn default() -> Self {
        Self::new()
    }
}

impl DocField for TagsField {
    fn name(&self) -> &str {
        TAGS_KEY
    }

    fn verbose_name(&self) -> &str {
        &self.verbose_name
    }

    fn top_level_entries(&self) -> Vec<(String, ValueKind)> {
        vec![(TAGS_KEY.to_string(), ValueKind::Map)]
    }

    fn after_persist(&self, txn: &Transaction<'_>, row: &mut ShadowRow) {
        if let Some(column) = &self.column {
            row.insert(column.clone(), Value::from(tag_names(txn)));
        }
    }

    fn observe_for_history(&self, doc: &Doc) -> Option<Box<dyn HistoryObserver>> {
        Some(Box::new(TagsObserver::new(&self.verbose_name, doc)))
    }
}
