//! Cosine-similarity vector index for tests and small deployments.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use crate::types::{ChunkId, SearchFilters};
use crate::vector_index::{
    ChunkPayload, ChunkPoint, ScoredChunk, VectorIndex, VectorIndexError, matches_filters,
};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

struct StoredPoint {
    vector: Vec<f32>,
    payload: ChunkPayload,
}

pub struct InMemoryVectorIndex {
    collections: RwLock<HashMap<String, HashMap<ChunkId, StoredPoint>>>,
}

impl InMemoryVectorIndex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryVectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorIndex").finish_non_exhaustive()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl VectorIndex for InMemoryVectorIndex {
    fn ensure_collection(
        &self,
        collection: &str,
        _vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorIndexError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorIndexError::Collection(e.to_string()))?;
            cols.entry(collection).or_default();
            Ok(())
        })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorIndexError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorIndexError::Collection(e.to_string()))?;
            cols.remove(&collection);
            Ok(())
        })
    }

    fn upsert(
        &self,
        collection: &str,
        points: Vec<ChunkPoint>,
    ) -> BoxFuture<'_, Result<(), VectorIndexError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorIndexError::Upsert(e.to_string()))?;
            let col = cols.entry(collection).or_default();
            for p in points {
                col.insert(
                    p.id,
                    StoredPoint {
                        vector: p.vector,
                        payload: p.payload,
                    },
                );
            }
            Ok(())
        })
    }

    fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
        filters: SearchFilters,
    ) -> BoxFuture<'_, Result<Vec<ScoredChunk>, VectorIndexError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorIndexError::Search(e.to_string()))?;
            let Some(col) = cols.get(&collection) else {
                return Ok(Vec::new());
            };

            let mut scored: Vec<ScoredChunk> = col
                .iter()
                .filter(|(_, sp)| matches_filters(&sp.payload, &filters))
                .map(|(id, sp)| ScoredChunk {
                    id: *id,
                    score: cosine_similarity(&vector, &sp.vector),
                    payload: sp.payload.clone(),
                })
                .collect();

            scored.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            #[expect(clippy::cast_possible_truncation)]
            scored.truncate(limit as usize);
            Ok(scored)
        })
    }

    fn delete_by_ids(
        &self,
        collection: &str,
        ids: Vec<ChunkId>,
    ) -> BoxFuture<'_, Result<(), VectorIndexError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(());
            }
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorIndexError::Delete(e.to_string()))?;
            if let Some(col) = cols.get_mut(&collection) {
                for id in &ids {
                    col.remove(id);
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentId;

    fn payload(parent: DocumentId, ordinal: u32) -> ChunkPayload {
        ChunkPayload {
            parent_id: parent,
            ordinal,
            category: None,
            author: None,
            created_at: 1_700_000_000,
        }
    }

    fn point(parent: DocumentId, ordinal: u32, vector: Vec<f32>) -> ChunkPoint {
        ChunkPoint {
            id: ChunkId::derive(parent, ordinal),
            vector,
            payload: payload(parent, ordinal),
        }
    }

    #[tokio::test]
    async fn upsert_and_search_ranked_by_cosine() {
        let index = InMemoryVectorIndex::new();
        index.ensure_collection("kb", 3).await.unwrap();
        let parent = DocumentId::new();
        index
            .upsert(
                "kb",
                vec![
                    point(parent, 0, vec![1.0, 0.0, 0.0]),
                    point(parent, 1, vec![0.0, 1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let results = index
            .search("kb", vec![1.0, 0.0, 0.0], 2, SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, ChunkId::derive(parent, 0));
        assert!((results[0].score - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn upsert_same_id_overwrites() {
        let index = InMemoryVectorIndex::new();
        let parent = DocumentId::new();
        index
            .upsert("kb", vec![point(parent, 0, vec![1.0, 0.0])])
            .await
            .unwrap();
        index
            .upsert("kb", vec![point(parent, 0, vec![0.0, 1.0])])
            .await
            .unwrap();

        let results = index
            .search("kb", vec![0.0, 1.0], 10, SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!((results[0].score - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn filters_applied_inside_search() {
        let index = InMemoryVectorIndex::new();
        let parent = DocumentId::new();
        let mut tagged = point(parent, 0, vec![1.0, 0.0]);
        tagged.payload.category = Some("news".into());
        let untagged = point(parent, 1, vec![1.0, 0.0]);
        index.upsert("kb", vec![tagged, untagged]).await.unwrap();

        let filters = SearchFilters {
            category: Some("news".into()),
            ..SearchFilters::default()
        };
        let results = index.search("kb", vec![1.0, 0.0], 10, filters).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, ChunkId::derive(parent, 0));
    }

    #[tokio::test]
    async fn missing_collection_searches_empty() {
        let index = InMemoryVectorIndex::new();
        let results = index
            .search("nope", vec![1.0], 5, SearchFilters::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn delete_by_ids_removes_points() {
        let index = InMemoryVectorIndex::new();
        let parent = DocumentId::new();
        index
            .upsert(
                "kb",
                vec![
                    point(parent, 0, vec![1.0, 0.0]),
                    point(parent, 1, vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        index
            .delete_by_ids("kb", vec![ChunkId::derive(parent, 0)])
            .await
            .unwrap();

        let results = index
            .search("kb", vec![1.0, 0.0], 10, SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, ChunkId::derive(parent, 1));
    }
}
