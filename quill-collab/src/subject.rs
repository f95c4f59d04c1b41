//! Subject identity: the `(kind, id)` pair naming one persisted record and
//! its document.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of the user an edit is attributed to.
pub type AuthorId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectRef {
    pub kind: String,
    pub id: u64,
}

impl SubjectRef {
    pub fn new(kind: impl Into<String>, id: u64) -> Self {
        Self { kind: kind.into(), id }
    }

    /// Broadcast room shared by every connection editing this subject.
    pub fn room_name(&self) -> String {
        format!("{}:{}", self.kind, self.id)
    }

    /// Storage key prefix: `<kind bytes><0x00><id:8 bytes BE>`.
    ///
    /// The separator keeps `("ab", 1)` and `("a", ..)` from sharing a prefix,
    /// and the big-endian id keeps subjects of one kind in numeric order.
    pub fn storage_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.kind.len() + 9);
        key.extend_from_slice(self.kind.as_bytes());
        key.push(0);
        key.extend_from_slice(&self.id.to_be_bytes());
        key
    }

    /// Parse a route of the form `/kind/id`. Query strings are ignored.
    pub fn parse_route(path: &str) -> Option<Self> {
        let path = path.split('?').next()?;
        let mut parts = path.trim_matches('/').split('/');
        let kind = parts.next().filter(|k| !k.is_empty())?;
        let id = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(kind, id))
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_route() {
        assert_eq!(SubjectRef::parse_route("/report/42"), Some(SubjectRef::new("report", 42)));
        assert_eq!(
            SubjectRef::parse_route("/report/42?token=abc"),
            Some(SubjectRef::new("report", 42))
        );
        assert_eq!(SubjectRef::parse_route("/report/"), None);
        assert_eq!(SubjectRef::parse_route("/report/x"), None);
        assert_eq!(SubjectRef::parse_route("/report/1/extra"), None);
        assert_eq!(SubjectRef::parse_route("/"), None);
    }

    #[test]
    fn test_storage_keys_do_not_overlap() {
        let a = SubjectRef::new("ab", 1).storage_key();
        let b = SubjectRef::new("a", 1).storage_key();
        assert!(!a.starts_with(&b));
        assert!(SubjectRef::new("r", 1).storage_key() < SubjectRef::new("r", 256).storage_key());
    }

    #[test]
    fn test_room_name_is_deterministic() {
        let subject = SubjectRef::new("report", 7);
        assert_eq!(subject.room_name(), SubjectRef::new("report", 7).room_name());
        assert_eq!(subject.to_string(), "report/7");
    }
}
