//! Deep structural copy of shared types between two documents.
//!
//! Every copy replaces the destination's content. Text keeps its per-run
//! formatting and embeds; trees are rebuilt node by node. The source is read
//! through its own transaction so source and destination never share one.

use std::collections::HashSet;

use yrs::types::text::YChange;
use yrs::{
    Any, Array, ArrayPrelim, ArrayRef, Doc, Map, MapPrelim, MapRef, Out, ReadTxn, Text, TextPrelim,
    Transact, TransactionMut, WriteTxn, Xml, XmlElementPrelim, XmlElementRef, XmlFragment,
    XmlFragmentPrelim, XmlFragmentRef, XmlOut, XmlTextPrelim,
};

use crate::field::ValueKind;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CopyError {
    #[error("cannot copy element <{from}> into element <{to}>")]
    TagMismatch { from: String, to: String },
    #[error("cannot copy {0}")]
    Unsupported(&'static str),
}

pub fn copy_text<S, D, T>(from: &S, from_txn: &T, to: &D, to_txn: &mut TransactionMut<'_>) -> Result<(), CopyError>
where
    S: Text,
    D: Text,
    T: ReadTxn,
{
    let len = to.len(&*to_txn);
    if len > 0 {
        to.remove_range(to_txn, 0, len);
    }
    for chunk in from.diff(from_txn, YChange::identity) {
        let index = to.len(&*to_txn);
        let attributes = chunk.attributes.map(|attrs| *attrs).unwrap_or_default();
        match chunk.insert {
            Out::Any(Any::String(s)) => to.insert_with_attributes(to_txn, index, &s, attributes),
            Out::Any(embed) => {
                to.insert_embed_with_attributes(to_txn, index, embed, attributes);
            }
            _ => return Err(CopyError::Unsupported("shared type embedded in text")),
        }
    }
    Ok(())
}

pub fn copy_xml_fragment<T: ReadTxn>(
    from: &XmlFragmentRef,
    from_txn: &T,
    to: &XmlFragmentRef,
    to_txn: &mut TransactionMut<'_>,
) -> Result<(), CopyError> {
    clear_children(to, to_txn);
    copy_children(from, from_txn, to, to_txn)
}

/// Copy attributes and children of `from` into `to`. Both elements must
/// carry the same tag; on mismatch nothing is written.
pub fn copy_xml_element<T: ReadTxn>(
    from: &XmlElementRef,
    from_txn: &T,
    to: &XmlElementRef,
    to_txn: &mut TransactionMut<'_>,
) -> Result<(), CopyError> {
    if from.tag() != to.tag() {
        return Err(CopyError::TagMismatch {
            from: from.tag().to_string(),
            to: to.tag().to_string(),
        });
    }
    clear_children(to, to_txn);

    let attributes: Vec<(String, Out)> = from
        .attributes(from_txn)
        .map(|(name, value)| (name.to_string(), value))
        .collect();
    let keep: HashSet<&str> = attributes.iter().map(|(name, _)| name.as_str()).collect();
    let stale: Vec<String> = to
        .attributes(&*to_txn)
        .map(|(name, _)| name.to_string())
        .filter(|name| !keep.contains(name.as_str()))
        .collect();
    for name in stale {
        to.remove_attribute(to_txn, &name);
    }
    for (name, value) in attributes {
        match value {
            Out::Any(any) => {
                to.insert_attribute(to_txn, name, any);
            }
            _ => return Err(CopyError::Unsupported("shared type as element attribute")),
        }
    }
    copy_children(from, from_txn, to, to_txn)
}

fn clear_children<F: XmlFragment>(node: &F, txn: &mut TransactionMut<'_>) {
    let len = node.len(&*txn);
    if len > 0 {
        node.remove_range(txn, 0, len);
    }
}

fn copy_children<S, D, T>(from: &S, from_txn: &T, to: &D, to_txn: &mut TransactionMut<'_>) -> Result<(), CopyError>
where
    S: XmlFragment,
    D: XmlFragment,
    T: ReadTxn,
{
    for index in 0..from.len(from_txn) {
        match from.get(from_txn, index) {
            Some(XmlOut::Element(element)) => {
                let copy = to.push_back(to_txn, XmlElementPrelim::empty(element.tag().clone()));
                copy_xml_element(&element, from_txn, &copy, to_txn)?;
            }
            Some(XmlOut::Text(text)) => {
                let copy = to.push_back(to_txn, XmlTextPrelim::new(""));
                copy_text(&text, from_txn, &copy, to_txn)?;
            }
            Some(XmlOut::Fragment(_)) => return Err(CopyError::Unsupported("nested fragment")),
            None => {}
        }
    }
    Ok(())
}

pub fn copy_map<T: ReadTxn>(from: &MapRef, from_txn: &T, to: &MapRef, to_txn: &mut TransactionMut<'_>) -> Result<(), CopyError> {
    let entries: Vec<(String, Out)> = from
        .iter(from_txn)
        .map(|(key, value)| (key.to_string(), value))
        .collect();
    let keep: HashSet<&str> = entries.iter().map(|(key, _)| key.as_str()).collect();
    let stale: Vec<String> = to
        .keys(&*to_txn)
        .filter(|key| !keep.contains(key))
        .map(str::to_string)
        .collect();
    for key in stale {
        to.remove(to_txn, &key);
    }
    for (key, value) in &entries {
        match value {
            Out::Any(any) => {
                to.insert(to_txn, key.as_str(), any.clone());
            }
            Out::YText(text) => {
                let copy = to.insert(to_txn, key.as_str(), TextPrelim::new(""));
                copy_text(text, from_txn, &copy, to_txn)?;
            }
            Out::YXmlFragment(fragment) => {
                let copy = to.insert(to_txn, key.as_str(), XmlFragmentPrelim::default());
                copy_xml_fragment(fragment, from_txn, &copy, to_txn)?;
            }
            Out::YMap(map) => {
                let copy = to.insert(to_txn, key.as_str(), MapPrelim::default());
                copy_map(map, from_txn, &copy, to_txn)?;
            }
            Out::YArray(array) => {
                let copy = to.insert(to_txn, key.as_str(), ArrayPrelim::default());
                copy_array(array, from_txn, &copy, to_txn)?;
            }
            _ => return Err(CopyError::Unsupported("map value")),
        }
    }
    Ok(())
}

pub fn copy_array<T: ReadTxn>(
    from: &ArrayRef,
    from_txn: &T,
    to: &ArrayRef,
    to_txn: &mut TransactionMut<'_>,
) -> Result<(), CopyError> {
    let len = to.len(&*to_txn);
    if len > 0 {
        to.remove_range(to_txn, 0, len);
    }
    let items: Vec<Out> = from.iter(from_txn).collect();
    for item in &items {
        match item {
            Out::Any(any) => {
                to.push_back(to_txn, any.clone());
            }
            Out::YText(text) => {
                let copy = to.push_back(to_txn, TextPrelim::new(""));
                copy_text(text, from_txn, &copy, to_txn)?;
            }
            Out::YXmlFragment(fragment) => {
                let copy = to.push_back(to_txn, XmlFragmentPrelim::default());
                copy_xml_fragment(fragment, from_txn, &copy, to_txn)?;
            }
            Out::YMap(map) => {
                let copy = to.push_back(to_txn, MapPrelim::default());
                copy_map(map, from_txn, &copy, to_txn)?;
            }
            Out::YArray(array) => {
                let copy = to.push_back(to_txn, ArrayPrelim::default());
                copy_array(array, from_txn, &copy, to_txn)?;
            }
            _ => return Err(CopyError::Unsupported("array item")),
        }
    }
    Ok(())
}

/// Build a new document holding a deep copy of the given top-level entries
/// of `source`. Entries missing from the source are skipped.
pub fn duplicate_document(source: &Doc, entries: &[(String, ValueKind)]) -> Result<Doc, CopyError> {
    let target = Doc::new();
    {
        let src = source.transact();
        let mut dst = target.transact_mut();
        for (name, kind) in entries {
            match kind {
                ValueKind::Text => {
                    if let Some(text) = src.get_text(name.as_str()) {
                        let copy = dst.get_or_insert_text(name.as_str());
                        copy_text(&text, &src, &copy, &mut dst)?;
                    }
                }
                ValueKind::RichText => {
                    if let Some(fragment) = src.get_xml_fragment(name.as_str()) {
                        let copy = dst.get_or_insert_xml_fragment(name.as_str());
                        copy_xml_fragment(&fragment, &src, &copy, &mut dst)?;
                    }
                }
                ValueKind::Map => {
                    if let Some(map) = src.get_map(name.as_str()) {
                        let copy = dst.get_or_insert_map(name.as_str());
                        copy_map(&map, &src, &copy, &mut dst)?;
                    }
                }
                ValueKind::Array => {
                    if let Some(array) = src.get_array(name.as_str()) {
                        let copy = dst.get_or_insert_array(name.as_str());
                        copy_array(&array, &src, &copy, &mut dst)?;
                    }
                }
                ValueKind::Scalar => {}
            }
        }
    }
    Ok(target)
}
