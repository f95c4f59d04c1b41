use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use yrs::{Out, ReadTxn};

use super::FieldError;
use crate::markup;
use crate::value::{display_out, out_to_json};

/// Column name -> value written to the relational shadow of a subject.
pub type ShadowRow = BTreeMap<String, Value>;

type CustomTransform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Function applied to a field value before it is copied to its column.
#[derive(Clone)]
pub enum ShadowTransform {
    /// Plain JSON projection (text as string, maps and arrays as JSON).
    Identity,
    /// Human-readable string form; rich text becomes markup.
    PlainText,
    /// Rich text rendered as markup. Null if the tree cannot be converted.
    Markup,
    /// Sorted keys of a map.
    Keys,
    /// Parse a JSON-encoded string. Null if it does not parse.
    JsonString,
    /// Arbitrary function over the identity projection.
    Custom(CustomTransform),
}

impl ShadowTransform {
    pub fn from_name(name: &str) -> Result<Self, FieldError> {
        match name {
            "identity" => Ok(ShadowTransform::Identity),
            "plain_text" => Ok(ShadowTransform::PlainText),
            "markup" => Ok(ShadowTransform::Markup),
            "keys" => Ok(ShadowTransform::Keys),
            "json_string" => Ok(ShadowTransform::JsonString),
            other => Err(FieldError::UnknownTransform(other.to_string())),
        }
    }

    pub fn custom(f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        ShadowTransform::Custom(Arc::new(f))
    }

    pub fn apply<T: ReadTxn>(&self, txn: &T, value: Option<&Out>) -> Value {
        match self {
            ShadowTransform::Identity => identity(txn, value),
            ShadowTransform::PlainText => Value::String(display_out(txn, value)),
            ShadowTransform::Markup => match value {
                Some(Out::YXmlFragment(fragment)) => markup::render_fragment(fragment, txn)
                    .map(Value::String)
                    .unwrap_or_else(|err| {
                        log::warn!("Cannot convert rich text for shadow copy: {}", err);
                        Value::Null
                    }),
                other => Value::String(display_out(txn, other)),
            },
            ShadowTransform::Keys => match identity(txn, value) {
                Value::Object(entries) => {
                    let mut keys: Vec<String> = entries.into_iter().map(|(k, _)| k).collect();
                    keys.sort();
                    Value::from(keys)
                }
                _ => Value::Array(Vec::new()),
            },
            ShadowTransform::JsonString => match identity(txn, value) {
                Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::Null),
                other => other,
            },
            ShadowTransform::Custom(f) => f(identity(txn, value)),
        }
    }
}

fn identity<T: ReadTxn>(txn: &T, value: Option<&Out>) -> Value {
    value.map(|out| out_to_json(txn, out)).unwrap_or(Value::Null)
}

impl fmt::Debug for ShadowTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShadowTransform::Identity => "identity",
            ShadowTransform::PlainText => "plain_text",
            ShadowTransform::Markup => "markup",
            ShadowTransform::Keys => "keys",
            ShadowTransform::JsonString => "json_string",
            ShadowTransform::Custom(_) => "custom",
        };
        write!(f, "ShadowTransform({})", name)
    }
}

/// Link from a field to a relational column.
#[derive(Debug, Clone)]
pub struct ShadowCopy {
    pub column: String,
    pub transform: ShadowTransform,
    /// Write once the document row exists instead of before it is written.
    pub after_persist: bool,
}

impl ShadowCopy {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            transform: ShadowTransform::Identity,
            after_persist: false,
        }
    }

    pub fn with_transform(mut self, transform: ShadowTransform) -> Self {
        self.transform = transform;
        self
    }

    pub fn after_persist(mut self) -> Self {
        self.after_persist = true;
        self
    }
}
