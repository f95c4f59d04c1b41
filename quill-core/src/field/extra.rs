use serde::{Deserialize, Serialize};
use serde_json::Value;
use yrs::{
    Any, Doc, Map, MapRef, Out, ReadTxn, TransactionMut, WriteTxn, XmlElementPrelim, XmlFragment,
    XmlFragmentPrelim, XmlFragmentRef, XmlTextPrelim,
};

use super::{DocField, FieldError, ValueKind};
use crate::diff::{CompositeObserver, HistoryObserver, RichTextObserver, ScalarObserver};
use crate::markup;
use crate::path::FieldPath;

/// Top-level map reserved for user-defined fields.
pub const EXTRA_FIELDS_KEY: &str = "extra_fields";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtraFieldType {
    SingleLineText,
    RichText,
    Integer,
    Float,
    Boolean,
    /// Stored as a JSON-encoded string.
    Json,
}

/// Externally declared field living inside the extra fields map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraFieldSpec {
    pub internal_name: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub field_type: ExtraFieldType,
    #[serde(default)]
    pub default: Option<Value>,
}

impl ExtraFieldSpec {
    pub fn new(internal_name: impl Into<String>, display_name: impl Into<String>, field_type: ExtraFieldType) -> Self {
        Self {
            internal_name: internal_name.into(),
            display_name: display_name.into(),
            field_type,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    fn path(&self) -> FieldPath {
        FieldPath::top_level(EXTRA_FIELDS_KEY).child(self.internal_name.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum ExtraFieldValue {
    Text(String),
    RichText(XmlFragmentRef),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Json(Value),
}

impl ExtraFieldValue {
    pub fn display<T: ReadTxn>(&self, txn: &T) -> String {
        match self {
            ExtraFieldValue::Text(s) => s.clone(),
            ExtraFieldValue::RichText(fragment) => markup::render_fragment(fragment, txn).unwrap_or_default(),
            ExtraFieldValue::Integer(i) => i.to_string(),
            ExtraFieldValue::Float(f) => f.to_string(),
            ExtraFieldValue::Boolean(b) => b.to_string(),
            ExtraFieldValue::Json(v) => v.to_string(),
        }
    }
}

/// Read access to the extra fields of one document, resolved through the
/// declared spec list.
pub struct ExtraFields<'a> {
    map: Option<MapRef>,
    specs: &'a [ExtraFieldSpec],
}

impl<'a> ExtraFields<'a> {
    pub fn new<T: ReadTxn>(txn: &T, specs: &'a [ExtraFieldSpec]) -> Self {
        Self {
            map: txn.get_map(EXTRA_FIELDS_KEY),
            specs,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn spec(&self, name: &str) -> Result<&'a ExtraFieldSpec, FieldError> {
        find_spec(self.specs, name)
    }

    /// Value of a declared field. Unknown names are an error; a declared
    /// field without a usable value is `None`.
    pub fn get<T: ReadTxn>(&self, txn: &T, name: &str) -> Result<Option<ExtraFieldValue>, FieldError> {
        let spec = self.spec(name)?;
        Ok(self.value_of(txn, spec))
    }

    /// Every declared field with its current value, in schema order.
    pub fn iter<T: ReadTxn>(&self, txn: &T) -> Vec<(&'a ExtraFieldSpec, Option<ExtraFieldValue>)> {
        self.specs
            .iter()
            .map(|spec| (spec, self.value_of(txn, spec)))
            .collect()
    }

    fn value_of<T: ReadTxn>(&self, txn: &T, spec: &ExtraFieldSpec) -> Option<ExtraFieldValue> {
        let out = self.map.as_ref()?.get(txn, &spec.internal_name)?;
        match (spec.field_type, out) {
            (ExtraFieldType::RichText, Out::YXmlFragment(fragment)) => Some(ExtraFieldValue::RichText(fragment)),
            (ExtraFieldType::SingleLineText, Out::Any(Any::String(s))) => Some(ExtraFieldValue::Text(s.to_string())),
            (ExtraFieldType::Integer, Out::Any(Any::Number(n))) if n.fract() == 0.0 => {
                Some(ExtraFieldValue::Integer(n as i64))
            }
            (ExtraFieldType::Integer, Out::Any(Any::BigInt(i))) => Some(ExtraFieldValue::Integer(i)),
            (ExtraFieldType::Float, Out::Any(Any::Number(n))) => Some(ExtraFieldValue::Float(n)),
            (ExtraFieldType::Float, Out::Any(Any::BigInt(i))) => Some(ExtraFieldValue::Float(i as f64)),
            (ExtraFieldType::Boolean, Out::Any(Any::Bool(b))) => Some(ExtraFieldValue::Boolean(b)),
            (ExtraFieldType::Json, Out::Any(Any::String(raw))) => match serde_json::from_str(&raw) {
                Ok(value) => Some(ExtraFieldValue::Json(value)),
                Err(err) => {
                    log::debug!("Extra field {} holds invalid JSON: {}", spec.internal_name, err);
                    None
                }
            },
            _ => None,
        }
    }
}

fn find_spec<'a>(specs: &'a [ExtraFieldSpec], name: &str) -> Result<&'a ExtraFieldSpec, FieldError> {
    specs
        .iter()
        .find(|spec| spec.internal_name == name)
        .ok_or_else(|| FieldError::UnknownExtraField(name.to_string()))
}

/// The extra fields field: one reserved map holding every user-defined
/// field of the subject's schema.
#[derive(Debug, Clone)]
pub struct ExtraFieldsField {
    verbose_name: String,
    specs: Vec<ExtraFieldSpec>,
}

impl ExtraFieldsField {
    pub fn new(specs: Vec<ExtraFieldSpec>) -> Self {
        Self {
            verbose_name: "Extra fields".to_string(),
            specs,
        }
    }

    pub fn specs(&self) -> &[ExtraFieldSpec] {
        &self.specs
    }

    pub fn read<T: ReadTxn>(&self, txn: &T) -> ExtraFields<'_> {
        ExtraFields::new(txn, &self.specs)
    }

    /// Write a declared field from its JSON form. `null` removes the value.
    pub fn set(&self, txn: &mut TransactionMut<'_>, name: &str, value: &Value) -> Result<(), FieldError> {
        let spec = find_spec(&self.specs, name)?;
        let map = txn.get_or_insert_map(EXTRA_FIELDS_KEY);
        let any = match (spec.field_type, value) {
            (_, Value::Null) => {
                map.remove(txn, name);
                return Ok(());
            }
            (ExtraFieldType::RichText, Value::String(text)) => {
                insert_rich_text(txn, &map, name, text);
                return Ok(());
            }
            (ExtraFieldType::SingleLineText, Value::String(s)) => Any::from(s.as_str()),
            (ExtraFieldType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => {
                Any::Number(n.as_f64().unwrap_or_default())
            }
            (ExtraFieldType::Float, Value::Number(n)) => Any::Number(n.as_f64().unwrap_or_default()),
            (ExtraFieldType::Boolean, Value::Bool(b)) => Any::Bool(*b),
            (ExtraFieldType::Json, other) => Any::from(other.to_string()),
            _ => return Err(FieldError::TypeMismatch(name.to_string())),
        };
        map.insert(txn, name, any);
        Ok(())
    }
}

/// Replace a rich text extra field with a fresh tree holding `text` as a
/// single paragraph.
fn insert_rich_text(txn: &mut TransactionMut<'_>, map: &MapRef, name: &str, text: &str) {
    let fragment = map.insert(txn, name, XmlFragmentPrelim::default());
    if !text.is_empty() {
        let paragraph = fragment.push_back(txn, XmlElementPrelim::empty("paragraph"));
        paragraph.push_back(txn, XmlTextPrelim::new(text));
    }
}

impl DocField for ExtraFieldsField {
    fn name(&self) -> &str {
        EXTRA_FIELDS_KEY
    }

    fn verbose_name(&self) -> &str {
        &self.verbose_name
    }

    fn top_level_entries(&self) -> Vec<(String, ValueKind)> {
        vec![(EXTRA_FIELDS_KEY.to_string(), ValueKind::Map)]
    }

    fn initialize(&self, txn: &mut TransactionMut<'_>) -> Result<(), FieldError> {
        for spec in &self.specs {
            match (&spec.default, spec.field_type) {
                (Some(default), _) => self.set(txn, &spec.internal_name, default)?,
                (None, ExtraFieldType::RichText) => {
                    let map = txn.get_or_insert_map(EXTRA_FIELDS_KEY);
                    insert_rich_text(txn, &map, &spec.internal_name, "");
                }
                (None, _) => {}
            }
        }
        Ok(())
    }

    fn observe_for_history(&self, doc: &Doc) -> Option<Box<dyn HistoryObserver>> {
        let children: Vec<Box<dyn HistoryObserver>> = self
            .specs
            .iter()
            .map(|spec| -> Box<dyn HistoryObserver> {
                match spec.field_type {
                    ExtraFieldType::RichText => {
                        Box::new(RichTextObserver::new(&spec.display_name, doc, spec.path()))
                    }
                    _ => Box::new(ScalarObserver::new(
                        &spec.display_name,
                        doc,
                        spec.path(),
                        ValueKind::Scalar,
                    )),
                }
            })
            .collect();
        Some(Box::new(CompositeObserver::new(children)))
    }
}
