use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for deriving chunk ids. Fixed forever: changing it would
/// orphan every previously indexed vector.
const CHUNK_NAMESPACE: Uuid = Uuid::from_u128(0x8f1d_02aa_6c43_4b05_9e71_d4c2_03b7_51e9);

/// Strongly typed wrapper for parent document ids.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DocumentId(pub Uuid);

impl DocumentId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// # Errors
    ///
    /// Returns an error when `s` is not a valid UUID.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strongly typed wrapper for chunk ids.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChunkId(pub Uuid);

impl ChunkId {
    /// Deterministic id from parent and ordinal, so re-indexing a document
    /// overwrites its chunks instead of duplicating them.
    #[must_use]
    pub fn derive(parent: DocumentId, ordinal: u32) -> Self {
        let name = format!("{parent}:{ordinal}");
        Self(Uuid::new_v5(&CHUNK_NAMESPACE, name.as_bytes()))
    }

    /// # Errors
    ///
    /// Returns an error when `s` is not a valid UUID.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A whole source document: the unit returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentDocument {
    pub id: DocumentId,
    pub collection: String,
    pub title: String,
    pub full_text: String,
    pub category: Option<String>,
    pub author: Option<String>,
    /// Unix seconds.
    pub created_at: i64,
    pub metadata: serde_json::Value,
}

/// One indexed slice of a parent document: the unit of search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub id: ChunkId,
    pub parent_id: DocumentId,
    pub ordinal: u32,
    pub collection: String,
    pub content: String,
}

/// Metadata predicates applied inside both search backends, never as a
/// post-filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub category: Option<String>,
    pub author: Option<String>,
    /// Unix seconds floor on `created_at`.
    pub created_after: Option<i64>,
}

impl SearchFilters {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.category.is_none() && self.author.is_none() && self.created_after.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_deterministic() {
        let parent = DocumentId::new();
        assert_eq!(ChunkId::derive(parent, 0), ChunkId::derive(parent, 0));
        assert_ne!(ChunkId::derive(parent, 0), ChunkId::derive(parent, 1));
    }

    #[test]
    fn chunk_id_differs_per_parent() {
        let a = DocumentId::new();
        let b = DocumentId::new();
        assert_ne!(ChunkId::derive(a, 0), ChunkId::derive(b, 0));
    }

    #[test]
    fn document_id_round_trips() {
        let id = DocumentId::new();
        assert_eq!(DocumentId::parse(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn ids_serialize_as_bare_uuid_strings() {
        let parent = DocumentId::new();
        let chunk = ChunkId::derive(parent, 0);
        let json = serde_json::to_string(&(parent, chunk)).unwrap();
        assert_eq!(json, format!("[\"{parent}\",\"{chunk}\"]"));
        let back: (DocumentId, ChunkId) = serde_json::from_str(&json).unwrap();
        assert_eq!(back, (parent, chunk));
    }

    #[test]
    fn empty_filters() {
        assert!(SearchFilters::default().is_empty());
        let filters = SearchFilters {
            category: Some("news".into()),
            ..SearchFilters::default()
        };
        assert!(!filters.is_empty());
    }
}
