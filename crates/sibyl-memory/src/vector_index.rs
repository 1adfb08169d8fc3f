//! Object-safe seam over the vector search backend.

use std::future::Future;
use std::pin::Pin;

use crate::types::{ChunkId, DocumentId, SearchFilters};

#[derive(Debug, thiserror::Error)]
pub enum VectorIndexError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("collection error: {0}")]
    Collection(String),
    #[error("upsert error: {0}")]
    Upsert(String),
    #[error("search error: {0}")]
    Search(String),
    #[error("delete error: {0}")]
    Delete(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Chunk metadata carried alongside the vector, enough to filter and to
/// map a hit back to its parent without touching SQLite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPayload {
    pub parent_id: DocumentId,
    pub ordinal: u32,
    pub category: Option<String>,
    pub author: Option<String>,
    /// Unix seconds.
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct ChunkPoint {
    pub id: ChunkId,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub id: ChunkId,
    pub score: f32,
    pub payload: ChunkPayload,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait VectorIndex: Send + Sync {
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorIndexError>>;

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorIndexError>>;

    fn upsert(
        &self,
        collection: &str,
        points: Vec<ChunkPoint>,
    ) -> BoxFuture<'_, Result<(), VectorIndexError>>;

    /// Nearest chunks by cosine similarity, metadata predicates applied
    /// inside the index.
    fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
        filters: SearchFilters,
    ) -> BoxFuture<'_, Result<Vec<ScoredChunk>, VectorIndexError>>;

    fn delete_by_ids(
        &self,
        collection: &str,
        ids: Vec<ChunkId>,
    ) -> BoxFuture<'_, Result<(), VectorIndexError>>;
}

pub(crate) fn matches_filters(payload: &ChunkPayload, filters: &SearchFilters) -> bool {
    if let Some(ref category) = filters.category
        && payload.category.as_deref() != Some(category.as_str())
    {
        return false;
    }
    if let Some(ref author) = filters.author
        && payload.author.as_deref() != Some(author.as_str())
    {
        return false;
    }
    if let Some(floor) = filters.created_after
        && payload.created_at < floor
    {
        return false;
    }
    true
}
