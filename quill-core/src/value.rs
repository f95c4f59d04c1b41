//! Conversions between document values and plain application values.
//!
//! Document values come in two flavours: primitive [`Any`] values that are
//! stored verbatim, and live shared types (text, rich text, maps, arrays)
//! that carry replication metadata. Shadow copies and diff rendering only
//! ever see the plain projections produced here.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use yrs::types::ToJson;
use yrs::{Any, GetString, Out, ReadTxn};

use crate::markup;

/// Convert a JSON value (as found in configuration) into a primitive
/// document value. Numbers are stored as floats, matching what web clients
/// write for plain JavaScript numbers.
pub fn json_to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(b) => Any::Bool(*b),
        Value::Number(n) => Any::Number(n.as_f64().unwrap_or_default()),
        Value::String(s) => Any::String(Arc::from(s.as_str())),
        Value::Array(items) => Any::Array(items.iter().map(json_to_any).collect::<Vec<_>>().into()),
        Value::Object(entries) => {
            let map: HashMap<String, Any> = entries
                .iter()
                .map(|(k, v)| (k.clone(), json_to_any(v)))
                .collect();
            Any::Map(Arc::new(map))
        }
    }
}

/// Convert a primitive document value into JSON.
pub fn any_to_json(any: &Any) -> Value {
    match any {
        Any::Null | Any::Undefined => Value::Null,
        Any::Bool(b) => Value::Bool(*b),
        Any::Number(n) => number_to_json(*n),
        Any::BigInt(i) => Value::from(*i),
        Any::String(s) => Value::String(s.to_string()),
        Any::Buffer(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
        Any::Array(items) => Value::Array(items.iter().map(any_to_json).collect()),
        Any::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), any_to_json(v)))
                .collect(),
        ),
    }
}

fn number_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// Plain JSON projection of any document value, live or primitive.
///
/// Text becomes a string, rich text its XML serialization, and maps and
/// arrays their JSON equivalents.
pub fn out_to_json<T: ReadTxn>(txn: &T, out: &Out) -> Value {
    match out {
        Out::Any(any) => any_to_json(any),
        Out::YText(text) => Value::String(text.get_string(txn)),
        Out::YXmlFragment(fragment) => Value::String(fragment.get_string(txn)),
        Out::YXmlElement(element) => Value::String(element.get_string(txn)),
        Out::YXmlText(text) => Value::String(text.get_string(txn)),
        Out::YMap(map) => any_to_json(&map.to_json(txn)),
        Out::YArray(array) => any_to_json(&array.to_json(txn)),
        _ => Value::Null,
    }
}

/// Human-readable string form of a document value.
///
/// Rich text is rendered as markup; absent and null values are empty.
pub fn display_out<T: ReadTxn>(txn: &T, out: Option<&Out>) -> String {
    match out {
        None => String::new(),
        Some(Out::Any(any)) => display_any(any),
        Some(Out::YText(text)) => text.get_string(txn),
        Some(Out::YXmlFragment(fragment)) => {
            markup::render_fragment(fragment, txn).unwrap_or_else(|err| {
                log::debug!("Falling back to raw XML: {}", err);
                fragment.get_string(txn)
            })
        }
        Some(Out::YXmlText(text)) => text.get_string(txn),
        Some(Out::YXmlElement(element)) => element.get_string(txn),
        Some(other) => out_to_json(txn, other).to_string(),
    }
}

pub fn display_any(any: &Any) -> String {
    match any {
        Any::Null | Any::Undefined => String::new(),
        Any::String(s) => s.to_string(),
        Any::Bool(b) => b.to_string(),
        Any::Number(n) => number_to_json(*n).to_string(),
        Any::BigInt(i) => i.to_string(),
        other => any_to_json(other).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use yrs::{Doc, Map, Text, Transact, WriteTxn};

    #[test]
    fn test_json_any_conversion_keeps_structure() {
        let value = json!({"a": [1, "two", true, null], "b": {"c": 2.5}});
        let any = json_to_any(&value);
        assert_eq!(any_to_json(&any), value);
    }

    #[test]
    fn test_integral_numbers_render_without_fraction() {
        assert_eq!(display_any(&Any::Number(3.0)), "3");
        assert_eq!(display_any(&Any::Number(2.5)), "2.5");
        assert_eq!(display_any(&Any::Null), "");
    }

    #[test]
    fn test_live_values_project_to_json() {
        let doc = Doc::new();
        {
            let mut txn = doc.transact_mut();
            let text = txn.get_or_insert_text("title");
            text.insert(&mut txn, 0, "Draft");
            let map = txn.get_or_insert_map("meta");
            map.insert(&mut txn, "pages", 4.0);
        }
        let txn = doc.transact();
        let title = Out::YText(txn.get_text("title").unwrap());
        let meta = Out::YMap(txn.get_map("meta").unwrap());
        assert_eq!(out_to_json(&txn, &title), json!("Draft"));
        assert_eq!(out_to_json(&txn, &meta), json!({"pages": 4}));
        assert_eq!(display_out(&txn, Some(&title)), "Draft");
        assert_eq!(display_out(&txn, None), "");
    }
}
