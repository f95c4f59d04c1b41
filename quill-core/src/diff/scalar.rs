use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use yrs::{Doc, Subscription, Transact};

use super::{observe_root, HistoryObserver};
use crate::field::ValueKind;
use crate::path::FieldPath;
use crate::value::display_out;

/// Tracks the display value at one path and renders `old → new`.
pub struct ScalarObserver {
    label: String,
    doc: Doc,
    path: FieldPath,
    kind: ValueKind,
    baseline: String,
    dirty: Arc<AtomicBool>,
    _subscription: Subscription,
}

impl ScalarObserver {
    pub fn new(label: &str, doc: &Doc, path: FieldPath, kind: ValueKind) -> Self {
        let dirty = Arc::new(AtomicBool::new(false));
        let subscription = {
            let dirty = dirty.clone();
            observe_root(doc, &path, kind, move || dirty.store(true, Ordering::Release))
        };
        let mut observer = Self {
            label: label.to_string(),
            doc: doc.clone(),
            path,
            kind,
            baseline: String::new(),
            dirty,
            _subscription: subscription,
        };
        observer.baseline = observer.current();
        observer
    }

    fn current(&self) -> String {
        let txn = self.doc.transact();
        display_out(&txn, self.path.resolve(&txn, self.kind).as_ref())
    }
}

impl HistoryObserver for ScalarObserver {
    fn render_and_reset(&mut self) -> Option<String> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return None;
        }
        let current = self.current();
        let old = std::mem::replace(&mut self.baseline, current);
        if old == self.baseline {
            return None;
        }
        Some(format!("{}: {:?} → {:?}", self.label, old, self.baseline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathSegment;
    use yrs::{Map, Text, WriteTxn};

    fn title_path() -> FieldPath {
        FieldPath::new("plain_fields", vec![PathSegment::Key("title".into())])
    }

    #[test]
    fn test_renders_old_and_new_value() {
        let doc = Doc::new();
        let mut observer = ScalarObserver::new("Title", &doc, title_path(), ValueKind::Scalar);
        {
            let mut txn = doc.transact_mut();
            let map = txn.get_or_insert_map("plain_fields");
            map.insert(&mut txn, "title", "Draft");
        }
        assert_eq!(
            observer.render_and_reset().as_deref(),
            Some("Title: \"\" → \"Draft\"")
        );
        assert_eq!(observer.render_and_reset(), None);
    }

    #[test]
    fn test_empty_to_empty_is_suppressed() {
        let doc = Doc::new();
        let mut observer = ScalarObserver::new("Title", &doc, title_path(), ValueKind::Scalar);
        {
            let mut txn = doc.transact_mut();
            let map = txn.get_or_insert_map("plain_fields");
            map.insert(&mut txn, "title", "");
        }
        assert_eq!(observer.render_and_reset(), None);
    }

    #[test]
    fn test_unrelated_key_in_same_map_is_suppressed() {
        let doc = Doc::new();
        let mut observer = ScalarObserver::new("Title", &doc, title_path(), ValueKind::Scalar);
        {
            let mut txn = doc.transact_mut();
            let map = txn.get_or_insert_map("plain_fields");
            map.insert(&mut txn, "summary", "Other");
        }
        assert_eq!(observer.render_and_reset(), None);
    }

    #[test]
    fn test_top_level_text() {
        let doc = Doc::new();
        let path = FieldPath::top_level("name");
        let mut observer = ScalarObserver::new("Name", &doc, path, ValueKind::Text);
        {
            let mut txn = doc.transact_mut();
            let text = txn.get_or_insert_text("name");
            text.insert(&mut txn, 0, "Acme");
        }
        assert_eq!(observer.render_and_reset().as_deref(), Some("Name: \"\" → \"Acme\""));
    }
}
