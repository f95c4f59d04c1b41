//! Debug rendering of a document's top-level entries.

use std::fmt::Write;

use yrs::{Array, Doc, GetString, Map, Out, ReadTxn, Transact};

use crate::field::ValueKind;
use crate::path::resolve_root;
use crate::value::any_to_json;

const INDENT: &str = "  ";

/// Render the given top-level entries of `doc`, sorted by name, with map
/// keys sorted as well. Entries missing from the document are left out.
pub fn dump_document(doc: &Doc, entries: &[(String, ValueKind)]) -> String {
    let txn = doc.transact();
    let mut sorted: Vec<&(String, ValueKind)> = entries.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    sorted.dedup_by(|a, b| a.0 == b.0);

    let mut out = String::from("{\n");
    for (name, kind) in sorted {
        if let Some(value) = resolve_root(&txn, name, *kind) {
            let _ = write!(out, "{}{:?}: ", INDENT, name);
            dump_value(&txn, &value, 1, &mut out);
            out.push_str(",\n");
        }
    }
    out.push('}');
    out
}

fn dump_value<T: ReadTxn>(txn: &T, value: &Out, depth: usize, out: &mut String) {
    let pad = INDENT.repeat(depth + 1);
    let close_pad = INDENT.repeat(depth);
    match value {
        Out::Any(any) => out.push_str(&any_to_json(any).to_string()),
        Out::YText(text) => {
            let _ = write!(out, "Text({:?})", text.get_string(txn));
        }
        Out::YXmlFragment(fragment) => {
            let _ = write!(out, "XmlFragment({})", fragment.get_string(txn));
        }
        Out::YXmlElement(element) => {
            let _ = write!(out, "XmlElement({})", element.get_string(txn));
        }
        Out::YXmlText(text) => {
            let _ = write!(out, "XmlText({:?})", text.get_string(txn));
        }
        Out::YMap(map) => {
            let mut entries: Vec<(String, Out)> = map.iter(txn).map(|(k, v)| (k.to_string(), v)).collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            out.push_str("Map {\n");
            for (key, item) in &entries {
                let _ = write!(out, "{}{:?}: ", pad, key);
                dump_value(txn, item, depth + 1, out);
                out.push_str(",\n");
            }
            let _ = write!(out, "{}}}", close_pad);
        }
        Out::YArray(array) => {
            out.push_str("Array [\n");
            for item in array.iter(txn) {
                out.push_str(&pad);
                dump_value(txn, &item, depth + 1, out);
                out.push_str(",\n");
            }
            let _ = write!(out, "{}]", close_pad);
        }
        _ => out.push_str("<unsupported>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yrs::{Text, WriteTxn};

    #[test]
    fn test_dump_sorts_entries_and_keys() {
        let doc = Doc::new();
        {
            let mut txn = doc.transact_mut();
            let title = txn.get_or_insert_text("title");
            title.insert(&mut txn, 0, "Draft");
            let tags = txn.get_or_insert_map("tags");
            tags.insert(&mut txn, "urgent", true);
            tags.insert(&mut txn, "backlog", true);
        }
        let entries = vec![
            ("title".to_string(), ValueKind::Text),
            ("tags".to_string(), ValueKind::Map),
            ("missing".to_string(), ValueKind::Array),
        ];
        let expected = "{\n  \"tags\": Map {\n    \"backlog\": true,\n    \"urgent\": true,\n  },\n  \"title\": Text(\"Draft\"),\n}";
        assert_eq!(dump_document(&doc, &entries), expected);
    }
}
