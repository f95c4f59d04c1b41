use std::sync::{Arc, Mutex};

use yrs::types::{Change, Delta, Event, Events, PathSegment as EventSegment};
use yrs::{Any, DeepObservable, Doc, Out, Subscription, Transact, TransactionMut};

use super::HistoryObserver;
use crate::field::ValueKind;
use crate::path::{FieldPath, PathSegment};
use crate::value::display_out;

/// Edits seen in a rich-text tree since the last render.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct EditTally {
    inserted_chars: u32,
    deleted_chars: u32,
    nodes_added: u32,
    nodes_removed: u32,
    reformatted: u32,
}

impl EditTally {
    /// Count the events touching the tree at `rest` below the observed root.
    fn record(&mut self, txn: &TransactionMut<'_>, events: &Events, rest: &[PathSegment]) {
        for event in events.iter() {
            let event_path = event.path();
            if event_path.len() < rest.len() {
                // an event on a container above the tree counts only when
                // it replaced the tree itself
                if event_path.len() + 1 == rest.len()
                    && same_prefix(&event_path, rest)
                    && replaces_child(txn, event, &rest[rest.len() - 1])
                {
                    self.nodes_added += 1;
                }
                continue;
            }
            if !same_prefix(&event_path, rest) {
                continue;
            }
            match event {
                Event::Text(e) => self.record_text(e.delta(txn)),
                Event::XmlText(e) => self.record_text(e.delta(txn)),
                Event::XmlFragment(e) => {
                    self.record_nodes(e.delta(txn));
                    self.reformatted += e.keys(txn).len() as u32;
                }
                Event::Array(e) => self.record_nodes(e.delta(txn)),
                Event::Map(e) => self.reformatted += e.keys(txn).len() as u32,
                _ => {}
            }
        }
    }

    fn record_text(&mut self, deltas: &[Delta]) {
        for delta in deltas {
            match delta {
                Delta::Inserted(Out::Any(Any::String(s)), _) => self.inserted_chars += s.chars().count() as u32,
                Delta::Inserted(_, _) => self.nodes_added += 1,
                Delta::Deleted(len) => self.deleted_chars += len,
                Delta::Retain(_, Some(_)) => self.reformatted += 1,
                Delta::Retain(_, None) => {}
            }
        }
    }

    fn record_nodes(&mut self, changes: &[Change]) {
        for change in changes {
            match change {
                Change::Added(values) => self.nodes_added += values.len() as u32,
                Change::Removed(len) => self.nodes_removed += len,
                Change::Retain(_) => {}
            }
        }
    }

    fn is_empty(&self) -> bool {
        *self == EditTally::default()
    }

    fn summary(&self) -> String {
        let mut parts = vec![format!("+{}/-{} characters", self.inserted_chars, self.deleted_chars)];
        if self.nodes_added + self.nodes_removed > 0 {
            parts.push(format!("+{}/-{} blocks", self.nodes_added, self.nodes_removed));
        }
        if self.reformatted > 0 {
            parts.push(format!("{} formatting changes", self.reformatted));
        }
        parts.join(", ")
    }
}

/// Whether the first `ours.len()` segments of `event_path` (or all of
/// them, if shorter) equal `ours`.
fn same_prefix<'a>(event_path: impl IntoIterator<Item = &'a EventSegment>, ours: &[PathSegment]) -> bool {
    event_path.into_iter().zip(ours).all(|pair| match pair {
        (EventSegment::Key(theirs), PathSegment::Key(key)) => theirs.as_ref() == key.as_str(),
        (EventSegment::Index(theirs), PathSegment::Index(index)) => theirs == index,
        _ => false,
    })
}

fn replaces_child(txn: &TransactionMut<'_>, event: &Event, child: &PathSegment) -> bool {
    match (event, child) {
        (Event::Map(e), PathSegment::Key(key)) => e.keys(txn).contains_key(key.as_str()),
        // index shifts are not tracked; any change to the array counts
        (Event::Array(_), PathSegment::Index(_)) => true,
        _ => false,
    }
}

/// Deep observer over a rich-text tree; renders the markup before and after
/// together with a tally of the edits.
pub struct RichTextObserver {
    label: String,
    doc: Doc,
    path: FieldPath,
    baseline: String,
    tally: Arc<Mutex<EditTally>>,
    _subscription: Subscription,
}

impl RichTextObserver {
    pub fn new(label: &str, doc: &Doc, path: FieldPath) -> Self {
        let tally = Arc::new(Mutex::new(EditTally::default()));
        let subscription = {
            let tally = tally.clone();
            let rest = path.rest().to_vec();
            let record = move |txn: &TransactionMut<'_>, events: &Events| {
                if let Ok(mut tally) = tally.lock() {
                    tally.record(txn, events, &rest);
                }
            };
            let root = path.root();
            match path.root_kind(ValueKind::RichText) {
                ValueKind::Map => doc.get_or_insert_map(root).observe_deep(record),
                ValueKind::Array => doc.get_or_insert_array(root).observe_deep(record),
                _ => doc.get_or_insert_xml_fragment(root).observe_deep(record),
            }
        };
        let mut observer = Self {
            label: label.to_string(),
            doc: doc.clone(),
            path,
            baseline: String::new(),
            tally,
            _subscription: subscription,
        };
        observer.baseline = observer.current();
        observer
    }

    fn current(&self) -> String {
        let txn = self.doc.transact();
        display_out(&txn, self.path.resolve(&txn, ValueKind::RichText).as_ref())
    }

    fn take_tally(&self) -> EditTally {
        self.tally
            .lock()
            .map(|mut tally| std::mem::take(&mut *tally))
            .unwrap_or_default()
    }
}

impl HistoryObserver for RichTextObserver {
    fn render_and_reset(&mut self) -> Option<String> {
        let tally = self.take_tally();
        if tally.is_empty() {
            return None;
        }
        let current = self.current();
        let old = std::mem::replace(&mut self.baseline, current);
        if old == self.baseline {
            return None;
        }
        Some(format!(
            "{} ({}): {:?} → {:?}",
            self.label,
            tally.summary(),
            old,
            self.baseline
        ))
    }
}
