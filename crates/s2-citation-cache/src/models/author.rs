//! Author reference matching the Semantic Scholar API schema.

use serde::{Deserialize, Serialize};

/// Minimal author reference (used in paper author lists).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorRef {
    /// Author ID.
    #[serde(default)]
    pub author_id: Option<String>,

    /// Author name.
    #[serde(default)]
    pub name: Option<String>,
}

impl AuthorRef {
    /// Create an author reference.
    #[must_use]
    pub fn new(author_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { author_id: Some(author_id.into()), name: Some(name.into()) }
    }
}
