use yrs::{Any, Array, Doc, Map, Out, ReadTxn, Text, Transaction, TransactionMut, WriteTxn};

use super::{default_verbose_name, DocField, FieldError, ShadowCopy, ShadowRow, ValueKind};
use crate::diff::{HistoryObserver, RichTextObserver, ScalarObserver};
use crate::path::{FieldPath, PathSegment};
use crate::value::display_out;

/// A field bound to one document path.
#[derive(Debug, Clone)]
pub struct ValueField {
    name: String,
    verbose_name: String,
    path: FieldPath,
    kind: ValueKind,
    default: Option<Any>,
    shadow: Option<ShadowCopy>,
}

impl ValueField {
    pub fn new(name: impl Into<String>, path: FieldPath, kind: ValueKind) -> Result<Self, FieldError> {
        let name = name.into();
        if path.is_top_level() && !kind.is_container() {
            return Err(FieldError::ScalarAtRoot(name));
        }
        Ok(Self {
            verbose_name: default_verbose_name(&name),
            name,
            path,
            kind,
            default: None,
            shadow: None,
        })
    }

    pub fn with_verbose_name(mut self, verbose_name: impl Into<String>) -> Self {
        self.verbose_name = verbose_name.into();
        self
    }

    pub fn with_default(mut self, default: impl Into<Any>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_shadow(mut self, shadow: ShadowCopy) -> Self {
        self.shadow = Some(shadow);
        self
    }

    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn shadow(&self) -> Option<&ShadowCopy> {
        self.shadow.as_ref()
    }

    /// Current value, falling back to the declared default when the path
    /// does not resolve.
    pub fn get<T: ReadTxn>(&self, txn: &T) -> Option<Out> {
        self.path
            .resolve(txn, self.kind)
            .or_else(|| self.default.clone().map(Out::Any))
    }

    /// Current value, falling back to `default` when the path does not
    /// resolve.
    pub fn get_or<T: ReadTxn>(&self, txn: &T, default: Out) -> Out {
        self.path.resolve(txn, self.kind).unwrap_or(default)
    }

    pub fn get_string<T: ReadTxn>(&self, txn: &T) -> String {
        display_out(txn, self.get(txn).as_ref())
    }

    /// Assign a primitive value.
    ///
    /// Live shared types are refused: they already belong to a document and
    /// must be edited through their own API. A top-level text field accepts
    /// a string and replaces its whole content.
    pub fn set(&self, txn: &mut TransactionMut<'_>, value: Out) -> Result<(), FieldError> {
        let value = match value {
            Out::Any(any) => any,
            _ => return Err(FieldError::LiveValue(self.name.clone())),
        };
        if self.path.is_top_level() {
            return self.replace_top_level(txn, value);
        }
        let parent = self
            .path
            .resolve_parent_mut(txn)
            .ok_or_else(|| FieldError::PathNotFound(self.path.to_string()))?;
        match (parent, self.path.last()) {
            (Out::YMap(map), Some(PathSegment::Key(key))) => {
                map.insert(txn, key.as_str(), value);
                Ok(())
            }
            (Out::YArray(array), Some(PathSegment::Index(index))) => {
                let index = *index;
                let len = array.len(&*txn);
                if index < len {
                    array.remove(txn, index);
                    array.insert(txn, index, value);
                } else if index == len {
                    array.push_back(txn, value);
                } else {
                    return Err(FieldError::IndexOutOfRange {
                        path: self.path.to_string(),
                        index,
                    });
                }
                Ok(())
            }
            _ => Err(FieldError::PathNotFound(self.path.to_string())),
        }
    }

    pub fn set_any(&self, txn: &mut TransactionMut<'_>, value: impl Into<Any>) -> Result<(), FieldError> {
        self.set(txn, Out::Any(value.into()))
    }

    fn replace_top_level(&self, txn: &mut TransactionMut<'_>, value: Any) -> Result<(), FieldError> {
        let root = self.path.root();
        match (self.kind, value) {
            (ValueKind::Text, Any::String(s)) => {
                let text = txn.get_or_insert_text(root);
                let len = text.len(&*txn);
                if len > 0 {
                    text.remove_range(txn, 0, len);
                }
                text.insert(txn, 0, &s);
            }
            (ValueKind::Map, Any::Map(entries)) => {
                let map = txn.get_or_insert_map(root);
                map.clear(txn);
                for (key, value) in entries.iter() {
                    map.insert(txn, key.as_str(), value.clone());
                }
            }
            (ValueKind::Array, Any::Array(items)) => {
                let array = txn.get_or_insert_array(root);
                let len = array.len(&*txn);
                if len > 0 {
                    array.remove_range(txn, 0, len);
                }
                for item in items.iter() {
                    array.push_back(txn, item.clone());
                }
            }
            _ => return Err(FieldError::TypeMismatch(self.name.clone())),
        }
        Ok(())
    }

    fn shadow_value(&self, txn: &Transaction<'_>, row: &mut ShadowRow) {
        if let Some(shadow) = &self.shadow {
            let value = self.get(txn);
            row.insert(shadow.column.clone(), shadow.transform.apply(txn, value.as_ref()));
        }
    }
}

impl DocField for ValueField {
    fn name(&self) -> &str {
        &self.name
    }

    fn verbose_name(&self) -> &str {
        &self.verbose_name
    }

    fn top_level_entries(&self) -> Vec<(String, ValueKind)> {
        vec![(self.path.root().to_string(), self.path.root_kind(self.kind))]
    }

    fn initialize(&self, txn: &mut TransactionMut<'_>) -> Result<(), FieldError> {
        match &self.default {
            Some(default) => self.set(txn, Out::Any(default.clone())),
            None => Ok(()),
        }
    }

    fn before_persist(&self, txn: &Transaction<'_>, row: &mut ShadowRow) {
        if self.shadow.as_ref().is_some_and(|s| !s.after_persist) {
            self.shadow_value(txn, row);
        }
    }

    fn after_persist(&self, txn: &Transaction<'_>, row: &mut ShadowRow) {
        if self.shadow.as_ref().is_some_and(|s| s.after_persist) {
            self.shadow_value(txn, row);
        }
    }

    fn observe_for_history(&self, doc: &Doc) -> Option<Box<dyn HistoryObserver>> {
        match self.kind {
            ValueKind::RichText => Some(Box::new(RichTextObserver::new(
                &self.verbose_name,
                doc,
                self.path.clone(),
            ))),
            kind => Some(Box::new(ScalarObserver::new(
                &self.verbose_name,
                doc,
                self.path.clone(),
                kind,
            ))),
        }
    }
}
