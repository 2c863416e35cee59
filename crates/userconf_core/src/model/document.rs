//! Document envelope returned by repositories.
//!
//! # Responsibility
//! - Pair a typed value with its store-assigned identifier.
//! - Render as the value's fields plus `_id` on the wire.
//!
//! # Invariants
//! - `DocumentId` is assigned once at creation and never reassigned.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Field name under which the identifier is exposed.
pub const ID_FIELD: &str = "_id";

/// Store-assigned document identifier, opaque to callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Generates a fresh identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for DocumentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Persisted value plus its identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document<T> {
    #[serde(rename = "_id")]
    pub id: DocumentId,
    #[serde(flatten)]
    pub value: T,
}

impl<T> Document<T> {
    pub fn new(id: DocumentId, value: T) -> Self {
        Self { id, value }
    }

    /// Drops the identifier and returns the value.
    pub fn into_value(self) -> T {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::{Document, DocumentId};
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn generated_ids_are_unique() {
        let ids: HashSet<DocumentId> = (0..64).map(|_| DocumentId::generate()).collect();
        assert_eq!(ids.len(), 64);
    }

    #[test]
    fn document_serializes_flat_with_id() {
        let document = Document::new(DocumentId::from("abc"), json!({"client_id": "acme"}));
        let rendered = serde_json::to_value(&document).unwrap();
        assert_eq!(rendered, json!({"_id": "abc", "client_id": "acme"}));
    }
}
