//! # Quill Core
//!
//! Typed views over replicated documents.
//!
//! A subject (a report, an asset, ...) keeps its structured data inside one
//! `yrs` document so that several people can edit it at once. This crate
//! maps that document onto application-level fields and back:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     SubjectSchema                        │
//! │  ValueField  │  TagsField  │  ExtraFieldsField  │ custom │
//! └──────┬───────────────┬────────────────┬──────────────────┘
//!        │ get / set     │ shadow rows    │ history observers
//!        ▼               ▼                ▼
//! ┌──────────────┐ ┌─────────────┐ ┌──────────────────────┐
//! │  yrs::Doc    │ │ ShadowRow   │ │ "Title: "" → "Draft"" │
//! └──────────────┘ └─────────────┘ └──────────────────────┘
//! ```
//!
//! Nothing here performs I/O; persistence and networking live in
//! `quill-collab`.

pub mod copy;
pub mod diff;
pub mod dump;
pub mod field;
pub mod markup;
pub mod path;
pub mod schema;
pub mod value;

pub use copy::{duplicate_document, CopyError};
pub use diff::{CompositeObserver, HistoryObserver};
pub use dump::dump_document;
pub use field::{
    DocField, ExtraFieldSpec, ExtraFieldType, ExtraFieldValue, ExtraFields, ExtraFieldsField,
    FieldError, ShadowCopy, ShadowRow, ShadowTransform, Tags, TagsField, ValueField, ValueKind,
};
pub use markup::MarkupError;
pub use path::{FieldPath, PathSegment};
pub use schema::{FieldConfig, FieldEntry, SchemaRegistry, SubjectConfig, SubjectSchema, TagsConfig};
