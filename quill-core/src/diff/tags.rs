use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use yrs::{Doc, Subscription, Transact};

use super::{observe_root, HistoryObserver};
use crate::field::{ValueKind, TAGS_KEY};
use crate::path::FieldPath;

/// Renders net tag membership changes as `+added, -removed`.
pub struct TagsObserver {
    label: String,
    doc: Doc,
    baseline: BTreeSet<String>,
    dirty: Arc<AtomicBool>,
    _subscription: Subscription,
}

impl TagsObserver {
    pub fn new(label: &str, doc: &Doc) -> Self {
        let dirty = Arc::new(AtomicBool::new(false));
        let subscription = {
            let dirty = dirty.clone();
            let path = FieldPath::top_level(TAGS_KEY);
            observe_root(doc, &path, ValueKind::Map, move || dirty.store(true, Ordering::Release))
        };
        let mut observer = Self {
            label: label.to_string(),
            doc: doc.clone(),
            baseline: BTreeSet::new(),
            dirty,
            _subscription: subscription,
        };
        observer.baseline = observer.current();
        observer
    }

    fn current(&self) -> BTreeSet<String> {
        let txn = self.doc.transact();
        crate::field::tag_names(&txn).into_iter().collect()
    }
}

impl HistoryObserver for TagsObserver {
    fn render_and_reset(&mut self) -> Option<String> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return None;
        }
        let current = self.current();
        let added = current.difference(&self.baseline).map(|t| format!("+{}", t));
        let removed = self.baseline.difference(&current).map(|t| format!("-{}", t));
        let changes: Vec<String> = added.chain(removed).collect();
        self.baseline = current;
        if changes.is_empty() {
            return None;
        }
        Some(format!("{}: {}", self.label, changes.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Tags;

    #[test]
    fn test_renders_sorted_net_changes() {
        let doc = Doc::new();
        {
            let mut txn = doc.transact_mut();
            Tags::get_or_insert(&mut txn).insert(&mut txn, "old");
        }
        let mut observer = TagsObserver::new("Tags", &doc);
        {
            let mut txn = doc.transact_mut();
            let tags = Tags::get_or_insert(&mut txn);
            tags.insert(&mut txn, "zeta");
            tags.insert(&mut txn, "alpha");
            tags.remove(&mut txn, "old");
        }
        assert_eq!(
            observer.render_and_reset().as_deref(),
            Some("Tags: +alpha, +zeta, -old")
        );
    }

    #[test]
    fn test_add_then_remove_is_suppressed() {
        let doc = Doc::new();
        let mut observer = TagsObserver::new("Tags", &doc);
        {
            let mut txn = doc.transact_mut();
            let tags = Tags::get_or_insert(&mut txn);
            tags.insert(&mut txn, "flaky");
        }
        {
            let mut txn = doc.transact_mut();
            let tags = Tags::get_or_insert(&mut txn);
            tags.remove(&mut txn, "flaky");
        }
        assert_eq!(observer.render_and_reset(), None);
    }
}
