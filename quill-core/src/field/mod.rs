//! Typed field projections over a replicated document.
//!
//! A subject's structured data (title, tags, rich-text description, user
//! defined extra fields) lives inside its document. Each field kind
//! implements [`DocField`], the capability interface the persistence layer
//! iterates over when it initializes a new document, refreshes shadow
//! columns and builds history observers.

mod extra;
mod shadow;
mod tags;
mod value_field;

pub use extra::{ExtraFieldSpec, ExtraFieldType, ExtraFieldValue, ExtraFields, ExtraFieldsField, EXTRA_FIELDS_KEY};
pub use shadow::{ShadowCopy, ShadowRow, ShadowTransform};
pub use tags::{Tags, TagsField, TAGS_KEY};
pub(crate) use tags::tag_names;
pub use value_field::ValueField;

use serde::{Deserialize, Serialize};
use yrs::{Doc, Transaction, TransactionMut};

use crate::diff::HistoryObserver;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FieldError {
    #[error("field path is empty")]
    EmptyPath,
    #[error("field path must start with a top-level key")]
    NonStringRoot,
    #[error("field `{0}` declares a scalar value at a top-level path")]
    ScalarAtRoot(String),
    #[error("cannot assign a live document value to `{0}`; mutate it through its container")]
    LiveValue(String),
    #[error("path `{0}` does not resolve to a container")]
    PathNotFound(String),
    #[error("index {index} is out of range for `{path}`")]
    IndexOutOfRange { path: String, index: u32 },
    #[error("value does not match the declared kind of `{0}`")]
    TypeMismatch(String),
    #[error("unknown extra field `{0}`")]
    UnknownExtraField(String),
    #[error("unknown shadow transform `{0}`")]
    UnknownTransform(String),
    #[error("field `{0}` is declared twice")]
    DuplicateField(String),
}

/// Declared kind of the value a field addresses.
///
/// Container kinds map onto the document's shared types; `Scalar` is a
/// primitive value stored inside a map or array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Text,
    RichText,
    Map,
    Array,
    Scalar,
}

impl ValueKind {
    pub fn is_container(self) -> bool {
        !matches!(self, ValueKind::Scalar)
    }
}

/// Capabilities a field kind contributes to its subject.
///
/// The default implementations make each capability opt-in, so a field only
/// overrides what it takes part in.
pub trait DocField: Send + Sync {
    fn name(&self) -> &str;

    /// Label used in rendered history.
    fn verbose_name(&self) -> &str;

    /// Top-level shared types this field owns, with their kinds.
    fn top_level_entries(&self) -> Vec<(String, ValueKind)>;

    /// Write the declared default into a freshly created document.
    fn initialize(&self, _txn: &mut TransactionMut<'_>) -> Result<(), FieldError> {
        Ok(())
    }

    /// Shadow columns refreshed before the document row is written.
    fn before_persist(&self, _txn: &Transaction<'_>, _row: &mut ShadowRow) {}

    /// Shadow columns refreshed once the document row exists.
    fn after_persist(&self, _txn: &Transaction<'_>, _row: &mut ShadowRow) {}

    /// Observer rendering this field's changes, if the field is tracked.
    fn observe_for_history(&self, _doc: &Doc) -> Option<Box<dyn HistoryObserver>> {
        None
    }
}

/// `stored_title` -> `Stored title`.
pub(crate) fn default_verbose_name(name: &str) -> String {
    let spaced = name.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_verbose_name() {
        assert_eq!(default_verbose_name("stored_title"), "Stored title");
        assert_eq!(default_verbose_name(""), "");
    }

    #[test]
    fn test_value_kind_names() {
        let kind: ValueKind = serde_json::from_str(r#""rich_text""#).unwrap();
        assert_eq!(kind, ValueKind::RichText);
        assert!(kind.is_container());
        assert!(!ValueKind::Scalar.is_container());
    }
}
