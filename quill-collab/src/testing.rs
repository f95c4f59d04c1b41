//! Fixtures shared by unit tests.

use quill_core::{SchemaRegistry, SubjectConfig, SubjectSchema};
use serde_json::json;
use yrs::{Doc, GetString, ReadTxn, Text, TextRef, Transact, TransactionMut};

use crate::storage::{DocumentStore, StoreConfig};

pub(crate) fn report_config() -> SubjectConfig {
    serde_json::from_value(json!({
        "kind": "report",
        "fields": [
            {"name": "title", "path": ["plain_fields", "title"], "kind": "scalar",
             "default": "", "copy_to": "stored_title"},
            {"name": "description", "path": "description", "kind": "rich_text",
             "copy_to": "description_html", "transform": "markup"}
        ],
        "tags": {"copy_to": "tag_list"}
    }))
    .unwrap()
}

pub(crate) fn report_schema() -> SubjectSchema {
    SubjectSchema::from_config(&report_config()).unwrap()
}

pub(crate) fn registry() -> SchemaRegistry {
    SchemaRegistry::from_config(&[report_config()]).unwrap()
}

pub(crate) fn temp_store() -> (tempfile::TempDir, DocumentStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = DocumentStore::open(StoreConfig::for_testing(dir.path())).unwrap();
    (dir, store)
}

/// Set the title on `client` and return the resulting update.
pub(crate) fn set_title(client: &Doc, schema: &SubjectSchema, title: &str) -> Vec<u8> {
    let sv = client.transact().state_vector();
    {
        let mut txn = client.transact_mut();
        schema.value("title").unwrap().set_any(&mut txn, title).unwrap();
    }
    client.transact().encode_state_as_update_v1(&sv)
}

/// Apply `edit` to the `body` text on `client` and return the resulting update.
pub(crate) fn edit_body(client: &Doc, edit: impl FnOnce(&mut TransactionMut, &TextRef)) -> Vec<u8> {
    let sv = client.transact().state_vector();
    let body = client.get_or_insert_text("body");
    edit(&mut client.transact_mut(), &body);
    client.transact().encode_state_as_update_v1(&sv)
}

pub(crate) fn body_of(doc: &Doc) -> String {
    let body = doc.get_or_insert_text("body");
    let txn = doc.transact();
    body.get_string(&txn)
}

/// Two editors of one subject. A types "Hello"; B sees it and appends
/// " world". Returns both updates; B's builds on A's.
pub(crate) fn dependent_edits(store: &DocumentStore, subject: &crate::SubjectRef) -> (Vec<u8>, Vec<u8>) {
    let a = store.load_document(subject).unwrap();
    let b = store.load_document(subject).unwrap();
    let hello = edit_body(&a, |txn, body| body.insert(txn, 0, "Hello"));
    crate::storage::apply_update(&b, &hello).unwrap();
    let world = edit_body(&b, |txn, body| body.insert(txn, 5, " world"));
    (hello, world)
}
