//! Connection authorization: a yes/no "can edit" decision that also yields
//! the author edits are attributed to.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::subject::{AuthorId, SubjectRef};

pub trait AccessPolicy: Send + Sync {
    /// The author `token` edits `subject` as, or `None` when it may not.
    fn authorize(&self, token: Option<&str>, subject: &SubjectRef) -> Option<AuthorId>;
}

/// A bearer token and what it grants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    pub token: String,
    pub author: AuthorId,
    /// Subject kinds the token may edit; empty grants every kind
    #[serde(default)]
    pub kinds: Vec<String>,
}

/// Static token table loaded from configuration. Requests without a token
/// are refused.
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    grants: HashMap<String, TokenGrant>,
}

impl TokenTable {
    pub fn new(grants: impl IntoIterator<Item = TokenGrant>) -> Self {
        Self {
            grants: grants.into_iter().map(|g| (g.token.clone(), g)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

impl AccessPolicy for TokenTable {
    fn authorize(&self, token: Option<&str>, subject: &SubjectRef) -> Option<AuthorId> {
        let grant = self.grants.get(token?)?;
        if grant.kinds.is_empty() || grant.kinds.iter().any(|k| *k == subject.kind) {
            Some(grant.author)
        } else {
            None
        }
    }
}
