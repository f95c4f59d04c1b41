//! Subject schemas: the ordered field list of each subject kind, built from
//! configuration once at startup.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use yrs::{Doc, Transact, Transaction};

use crate::diff::CompositeObserver;
use crate::dump::dump_document;
use crate::field::{
    DocField, ExtraFieldSpec, ExtraFieldsField, FieldError, ShadowCopy, ShadowRow, ShadowTransform,
    TagsField, ValueField, ValueKind,
};
use crate::path::FieldPath;
use crate::value::json_to_any;

/// Declaration of a path-bound field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    #[serde(default)]
    pub verbose_name: Option<String>,
    pub path: FieldPath,
    pub kind: ValueKind,
    #[serde(default)]
    pub default: Option<Value>,
    /// Shadow column the value is copied to.
    #[serde(default)]
    pub copy_to: Option<String>,
    #[serde(default)]
    pub transform: Option<String>,
    #[serde(default)]
    pub copy_after_persist: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagsConfig {
    #[serde(default)]
    pub verbose_name: Option<String>,
    #[serde(default)]
    pub copy_to: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectConfig {
    pub kind: String,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
    #[serde(default)]
    pub tags: Option<TagsConfig>,
    #[serde(default)]
    pub extra_fields: Vec<ExtraFieldSpec>,
}

impl FieldConfig {
    pub fn build(&self) -> Result<ValueField, FieldError> {
        let mut field = ValueField::new(&self.name, self.path.clone(), self.kind)?;
        if let Some(verbose_name) = &self.verbose_name {
            field = field.with_verbose_name(verbose_name);
        }
        if let Some(default) = &self.default {
            field = field.with_default(json_to_any(default));
        }
        if let Some(column) = &self.copy_to {
            let transform = match &self.transform {
                Some(name) => ShadowTransform::from_name(name)?,
                None => ShadowTransform::Identity,
            };
            let mut shadow = ShadowCopy::new(column).with_transform(transform);
            if self.copy_after_persist {
                shadow = shadow.after_persist();
            }
            field = field.with_shadow(shadow);
        } else if let Some(name) = &self.transform {
            // validated even when unused so typos surface at load time
            ShadowTransform::from_name(name)?;
        }
        Ok(field)
    }
}

/// A field of a subject schema, kept typed so callers can reach the
/// accessor API of each kind.
#[derive(Clone)]
pub enum FieldEntry {
    Value(ValueField),
    Tags(TagsField),
    Extra(ExtraFieldsField),
    Custom(Arc<dyn DocField>),
}

impl FieldEntry {
    pub fn as_field(&self) -> &dyn DocField {
        match self {
            FieldEntry::Value(field) => field,
            FieldEntry::Tags(field) => field,
            FieldEntry::Extra(field) => field,
            FieldEntry::Custom(field) => field.as_ref(),
        }
    }
}

/// Ordered fields of one subject kind.
#[derive(Clone)]
pub struct SubjectSchema {
    kind: String,
    fields: Vec<FieldEntry>,
}

impl SubjectSchema {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Vec::new(),
        }
    }

    pub fn from_config(config: &SubjectConfig) -> Result<Self, FieldError> {
        let mut schema = Self::new(&config.kind);
        for field in &config.fields {
            schema = schema.with_entry(FieldEntry::Value(field.build()?))?;
        }
        if let Some(tags) = &config.tags {
            let mut field = TagsField::new();
            if let Some(verbose_name) = &tags.verbose_name {
                field = field.with_verbose_name(verbose_name);
            }
            if let Some(column) = &tags.copy_to {
                field = field.with_column(column);
            }
            schema = schema.with_entry(FieldEntry::Tags(field))?;
        }
        if !config.extra_fields.is_empty() {
            let field = ExtraFieldsField::new(config.extra_fields.clone());
            schema = schema.with_entry(FieldEntry::Extra(field))?;
        }
        Ok(schema)
    }

    pub fn with_entry(mut self, entry: FieldEntry) -> Result<Self, FieldError> {
        let name = entry.as_field().name().to_string();
        if self.fields.iter().any(|f| f.as_field().name() == name) {
            return Err(FieldError::DuplicateField(name));
        }
        self.fields.push(entry);
        Ok(self)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn fields(&self) -> &[FieldEntry] {
        &self.fields
    }

    pub fn value(&self, name: &str) -> Option<&ValueField> {
        self.fields.iter().find_map(|entry| match entry {
            FieldEntry::Value(field) if field.name() == name => Some(field),
            _ => None,
        })
    }

    pub fn tags(&self) -> Option<&TagsField> {
        self.fields.iter().find_map(|entry| match entry {
            FieldEntry::Tags(field) => Some(field),
            _ => None,
        })
    }

    pub fn extra_fields(&self) -> Option<&ExtraFieldsField> {
        self.fields.iter().find_map(|entry| match entry {
            FieldEntry::Extra(field) => Some(field),
            _ => None,
        })
    }

    /// Every top-level entry owned by some field, without duplicates, in
    /// declaration order.
    pub fn top_level_entries(&self) -> Vec<(String, ValueKind)> {
        let mut seen = HashSet::new();
        self.fields
            .iter()
            .flat_map(|entry| entry.as_field().top_level_entries())
            .filter(|(name, _)| seen.insert(name.clone()))
            .collect()
    }

    /// Write declared defaults, in declaration order, in one transaction.
    pub fn initialize(&self, doc: &Doc) -> Result<(), FieldError> {
        let mut txn = doc.transact_mut();
        for entry in &self.fields {
            entry.as_field().initialize(&mut txn)?;
        }
        Ok(())
    }

    pub fn before_persist(&self, txn: &Transaction<'_>) -> ShadowRow {
        let mut row = ShadowRow::new();
        for entry in &self.fields {
            entry.as_field().before_persist(txn, &mut row);
        }
        row
    }

    pub fn after_persist(&self, txn: &Transaction<'_>) -> ShadowRow {
        let mut row = ShadowRow::new();
        for entry in &self.fields {
            entry.as_field().after_persist(txn, &mut row);
        }
        row
    }

    /// One observer per tracked field, attached to `doc`.
    pub fn observe_for_history(&self, doc: &Doc) -> CompositeObserver {
        let mut composite = CompositeObserver::default();
        for entry in &self.fields {
            if let Some(observer) = entry.as_field().observe_for_history(doc) {
                composite.push(observer);
            }
        }
        composite
    }

    pub fn dump(&self, doc: &Doc) -> String {
        dump_document(doc, &self.top_level_entries())
    }

    /// Read-only transaction helper for callers that only hold the schema.
    pub fn read<R>(&self, doc: &Doc, f: impl FnOnce(&Transaction<'_>) -> R) -> R {
        let txn = doc.transact();
        f(&txn)
    }
}

/// Schemas by subject kind.
#[derive(Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<SubjectSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(subjects: &[SubjectConfig]) -> Result<Self, FieldError> {
        let mut registry = Self::new();
        for subject in subjects {
            registry.register(SubjectSchema::from_config(subject)?);
        }
        log::debug!("Loaded {} subject schemas", registry.schemas.len());
        Ok(registry)
    }

    pub fn register(&mut self, schema: SubjectSchema) {
        self.schemas.insert(schema.kind.clone(), Arc::new(schema));
    }

    pub fn get(&self, kind: &str) -> Option<Arc<SubjectSchema>> {
        self.schemas.get(kind).cloned()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }
}
