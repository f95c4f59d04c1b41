//! Rendered history: what each saved entry changed, per field.
//!
//! Observers are attached to the document as it was right before an entry;
//! applying the entry's update then lets each of them render its field's
//! change. Observers are dropped, and so unsubscribed, when these functions
//! return, errors included.

use serde::Serialize;
use yrs::Doc;

use quill_core::SubjectSchema;

use crate::storage::{apply_update, DocumentStore, HistoryEntry, StoreError};
use crate::subject::{AuthorId, SubjectRef};

/// Rendered changes of one history entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryDiff {
    pub history_id: u64,
    pub author: Option<AuthorId>,
    pub timestamp: u64,
    /// One line per field that visibly changed
    pub lines: Vec<String>,
}

impl EntryDiff {
    fn new(entry: &HistoryEntry, lines: Vec<String>) -> Self {
        Self {
            history_id: entry.id,
            author: entry.author,
            timestamp: entry.timestamp,
            lines,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Render a single entry. `None` when the subject has no entry `history_id`.
pub fn render_entry(
    store: &DocumentStore,
    schema: &SubjectSchema,
    subject: &SubjectRef,
    history_id: u64,
) -> Result<Option<EntryDiff>, StoreError> {
    let Some((doc, entry)) = store.replay_until(subject, history_id)? else {
        return Ok(None);
    };
    let mut observers = schema.observe_for_history(&doc);
    apply_update(&doc, &entry.update)?;
    Ok(Some(EntryDiff::new(&entry, observers.render_lines())))
}

/// Render every entry of a subject, oldest first, walking one document
/// forward from empty.
pub fn render_history(
    store: &DocumentStore,
    schema: &SubjectSchema,
    subject: &SubjectRef,
) -> Result<Vec<EntryDiff>, StoreError> {
    let doc = Doc::new();
    let mut observers = schema.observe_for_history(&doc);
    let mut diffs = Vec::new();
    for entry in store.history_for(subject, false)? {
        apply_update(&doc, &entry.update)?;
        diffs.push(EntryDiff::new(&entry, observers.render_lines()));
    }
    Ok(diffs)
}
