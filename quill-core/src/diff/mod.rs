//! Human-readable change summaries for history entries.
//!
//! Observers are attached to a document reconstructed just before a history
//! entry. The caller applies the entry's update, then asks every observer to
//! render what changed. Rendering resets the observer, so the same set of
//! observers can walk a whole history oldest first.

mod rich_text;
mod scalar;
mod tags;

pub use rich_text::RichTextObserver;
pub use scalar::ScalarObserver;
pub use tags::TagsObserver;

use yrs::{DeepObservable, Doc, Observable, Subscription};

use crate::field::ValueKind;
use crate::path::FieldPath;

pub trait HistoryObserver {
    /// Summary of the changes seen since the last call, or `None` when
    /// nothing visible changed.
    fn render_and_reset(&mut self) -> Option<String>;
}

/// Runs a list of observers and joins their non-empty renders.
#[derive(Default)]
pub struct CompositeObserver {
    children: Vec<Box<dyn HistoryObserver>>,
}

impl CompositeObserver {
    pub fn new(children: Vec<Box<dyn HistoryObserver>>) -> Self {
        Self { children }
    }

    pub fn push(&mut self, child: Box<dyn HistoryObserver>) {
        self.children.push(child);
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// One line per child that rendered something.
    pub fn render_lines(&mut self) -> Vec<String> {
        self.children
            .iter_mut()
            .filter_map(|child| child.render_and_reset())
            .filter(|line| !line.is_empty())
            .collect()
    }
}

impl HistoryObserver for CompositeObserver {
    fn render_and_reset(&mut self) -> Option<String> {
        let lines = self.render_lines();
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }
}

/// Subscribe `on_change` to every change below the top-level container a
/// path starts from.
pub(crate) fn observe_root<F>(doc: &Doc, path: &FieldPath, kind: ValueKind, on_change: F) -> Subscription
where
    F: Fn() + Send + Sync + 'static,
{
    let root = path.root();
    match path.root_kind(kind) {
        ValueKind::Text => doc.get_or_insert_text(root).observe(move |_, _| on_change()),
        ValueKind::RichText => doc
            .get_or_insert_xml_fragment(root)
            .observe_deep(move |_, _| on_change()),
        ValueKind::Array => doc.get_or_insert_array(root).observe_deep(move |_, _| on_change()),
        ValueKind::Map | ValueKind::Scalar => {
            doc.get_or_insert_map(root).observe_deep(move |_, _| on_change())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Option<&'static str>);

    impl HistoryObserver for Fixed {
        fn render_and_reset(&mut self) -> Option<String> {
            self.0.take().map(str::to_string)
        }
    }

    #[test]
    fn test_composite_joins_non_empty_renders() {
        let mut composite = CompositeObserver::new(vec![
            Box::new(Fixed(Some("Title: \"\" → \"Draft\""))),
            Box::new(Fixed(None)),
            Box::new(Fixed(Some("Tags: +urgent"))),
        ]);
        assert_eq!(
            composite.render_and_reset().as_deref(),
            Some("Title: \"\" → \"Draft\"\nTags: +urgent")
        );
        assert_eq!(composite.render_and_reset(), None);
    }
}
