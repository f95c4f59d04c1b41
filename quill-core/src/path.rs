//! Document paths: a top-level key followed by map keys and sequence indexes.

use std::fmt;

use serde::{Deserialize, Serialize};
use yrs::{Any, Array, Map, Out, ReadTxn, TransactionMut, WriteTxn};

use crate::field::{FieldError, ValueKind};

/// One step below the top-level key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(u32),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<u32> for PathSegment {
    fn from(index: u32) -> Self {
        PathSegment::Index(index)
    }
}

/// How a path is written in configuration: either a bare top-level name or
/// a list of segments.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PathRepr {
    Name(String),
    Segments(Vec<PathSegment>),
}

/// Address of a value inside a document.
///
/// The first segment is always a string naming a top-level shared type.
/// When more segments follow, the kind of the top-level container is implied
/// by the next segment: a key means a map, an index means an array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PathRepr", into = "Vec<PathSegment>")]
pub struct FieldPath {
    root: String,
    rest: Vec<PathSegment>,
}

impl FieldPath {
    pub fn top_level(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            rest: Vec::new(),
        }
    }

    pub fn new(root: impl Into<String>, rest: Vec<PathSegment>) -> Self {
        Self {
            root: root.into(),
            rest,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn rest(&self) -> &[PathSegment] {
        &self.rest
    }

    pub fn is_top_level(&self) -> bool {
        self.rest.is_empty()
    }

    /// Last segment below the root, if any.
    pub fn last(&self) -> Option<&PathSegment> {
        self.rest.last()
    }

    pub fn child(&self, segment: impl Into<PathSegment>) -> Self {
        let mut rest = self.rest.clone();
        rest.push(segment.into());
        Self {
            root: self.root.clone(),
            rest,
        }
    }

    /// Kind of the top-level container this path starts from. `leaf` is the
    /// declared kind of the addressed value, used when the path is top-level.
    pub fn root_kind(&self, leaf: ValueKind) -> ValueKind {
        match self.rest.first() {
            None => leaf,
            Some(PathSegment::Key(_)) => ValueKind::Map,
            Some(PathSegment::Index(_)) => ValueKind::Array,
        }
    }

    /// Resolve the addressed value, or `None` if any lookup along the way
    /// misses.
    pub fn resolve<T: ReadTxn>(&self, txn: &T, leaf: ValueKind) -> Option<Out> {
        let mut current = resolve_root(txn, &self.root, self.root_kind(leaf))?;
        for segment in &self.rest {
            current = index_out(txn, &current, segment)?;
        }
        Some(current)
    }

    /// Resolve the container holding the last segment, creating the
    /// top-level container if it does not exist yet.
    pub(crate) fn resolve_parent_mut(&self, txn: &mut TransactionMut<'_>) -> Option<Out> {
        let (_, parents) = self.rest.split_last()?;
        let mut current = match self.rest.first()? {
            PathSegment::Key(_) => Out::YMap(txn.get_or_insert_map(self.root.as_str())),
            PathSegment::Index(_) => Out::YArray(txn.get_or_insert_array(self.root.as_str())),
        };
        for segment in parents {
            current = index_out(&*txn, &current, segment)?;
        }
        Some(current)
    }
}

impl TryFrom<PathRepr> for FieldPath {
    type Error = FieldError;

    fn try_from(repr: PathRepr) -> Result<Self, Self::Error> {
        match repr {
            PathRepr::Name(name) => Self::try_from(vec![PathSegment::Key(name)]),
            PathRepr::Segments(segments) => Self::try_from(segments),
        }
    }
}

impl TryFrom<Vec<PathSegment>> for FieldPath {
    type Error = FieldError;

    fn try_from(segments: Vec<PathSegment>) -> Result<Self, Self::Error> {
        let mut segments = segments.into_iter();
        match segments.next() {
            None => Err(FieldError::EmptyPath),
            Some(PathSegment::Index(_)) => Err(FieldError::NonStringRoot),
            Some(PathSegment::Key(root)) => Ok(Self {
                root,
                rest: segments.collect(),
            }),
        }
    }
}

impl From<FieldPath> for Vec<PathSegment> {
    fn from(path: FieldPath) -> Self {
        let mut segments = Vec::with_capacity(path.rest.len() + 1);
        segments.push(PathSegment::Key(path.root));
        segments.extend(path.rest);
        segments
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for segment in &self.rest {
            match segment {
                PathSegment::Key(key) => write!(f, ".{}", key)?,
                PathSegment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

/// Fetch a top-level shared type as the given kind.
pub fn resolve_root<T: ReadTxn>(txn: &T, name: &str, kind: ValueKind) -> Option<Out> {
    match kind {
        ValueKind::Text => txn.get_text(name).map(Out::YText),
        ValueKind::RichText => txn.get_xml_fragment(name).map(Out::YXmlFragment),
        ValueKind::Map => txn.get_map(name).map(Out::YMap),
        ValueKind::Array => txn.get_array(name).map(Out::YArray),
        ValueKind::Scalar => None,
    }
}

/// Step one segment into a value. Primitive JSON-like maps and arrays are
/// traversed as well as live ones.
pub fn index_out<T: ReadTxn>(txn: &T, value: &Out, segment: &PathSegment) -> Option<Out> {
    match (value, segment) {
        (Out::YMap(map), PathSegment::Key(key)) => map.get(txn, key),
        (Out::YArray(array), PathSegment::Index(index)) => array.get(txn, *index),
        (Out::Any(Any::Map(entries)), PathSegment::Key(key)) => {
            entries.get(key).cloned().map(Out::Any)
        }
        (Out::Any(Any::Array(items)), PathSegment::Index(index)) => {
            items.get(*index as usize).cloned().map(Out::Any)
        }
        _ => None,
    }
}
