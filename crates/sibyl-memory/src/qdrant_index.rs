//! Qdrant-backed [`VectorIndex`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use qdrant_client::Qdrant;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, PointId,
    PointStruct, PointsIdsList, Range, ScoredPoint, SearchPointsBuilder, UpsertPointsBuilder,
    VectorParamsBuilder,
};

use crate::types::{ChunkId, DocumentId, SearchFilters};
use crate::vector_index::{
    ChunkPayload, ChunkPoint, ScoredChunk, VectorIndex, VectorIndexError,
};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub struct QdrantVectorIndex {
    client: Qdrant,
}

impl std::fmt::Debug for QdrantVectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantVectorIndex").finish_non_exhaustive()
    }
}

impl QdrantVectorIndex {
    /// Connect to the given Qdrant URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be created.
    pub fn new(url: &str) -> Result<Self, VectorIndexError> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| VectorIndexError::Connection(e.to_string()))?;
        Ok(Self { client })
    }
}

fn to_point(point: ChunkPoint) -> Result<PointStruct, VectorIndexError> {
    let payload: serde_json::Value = serde_json::json!({
        "parent_id": point.payload.parent_id.to_string(),
        "ordinal": point.payload.ordinal,
        "category": point.payload.category,
        "author": point.payload.author,
        "created_at": point.payload.created_at,
    });
    let payload_map: HashMap<String, qdrant_client::qdrant::Value> =
        serde_json::from_value(payload)
            .map_err(|e| VectorIndexError::Serialization(e.to_string()))?;
    Ok(PointStruct::new(
        point.id.to_string(),
        point.vector,
        payload_map,
    ))
}

fn to_filter(filters: &SearchFilters) -> Option<Filter> {
    let mut conditions = Vec::new();
    if let Some(ref category) = filters.category {
        conditions.push(Condition::matches("category", category.clone()));
    }
    if let Some(ref author) = filters.author {
        conditions.push(Condition::matches("author", author.clone()));
    }
    if let Some(floor) = filters.created_after {
        #[expect(clippy::cast_precision_loss)]
        conditions.push(Condition::range(
            "created_at",
            Range {
                gte: Some(floor as f64),
                ..Range::default()
            },
        ));
    }
    if conditions.is_empty() {
        None
    } else {
        Some(Filter::must(conditions))
    }
}

fn from_scored(point: ScoredPoint) -> Option<ScoredChunk> {
    let id = match point.id?.point_id_options? {
        PointIdOptions::Uuid(s) => ChunkId::parse(&s).ok()?,
        PointIdOptions::Num(_) => return None,
    };
    let payload = &point.payload;
    let parent_id =
        DocumentId::parse(payload.get("parent_id")?.as_str()?).ok()?;
    let ordinal = u32::try_from(payload.get("ordinal")?.as_integer()?).ok()?;
    Some(ScoredChunk {
        id,
        score: point.score,
        payload: ChunkPayload {
            parent_id,
            ordinal,
            category: payload
                .get("category")
                .and_then(|v| v.as_str())
                .map(ToOwned::to_owned),
            author: payload
                .get("author")
                .and_then(|v| v.as_str())
                .map(ToOwned::to_owned),
            created_at: payload
                .get("created_at")
                .and_then(qdrant_client::qdrant::Value::as_integer)
                .unwrap_or(0),
        },
    })
}

impl VectorIndex for QdrantVectorIndex {
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorIndexError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let exists = self
                .client
                .collection_exists(&collection)
                .await
                .map_err(|e| VectorIndexError::Collection(e.to_string()))?;
            if exists {
                return Ok(());
            }
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&collection)
                        .vectors_config(VectorParamsBuilder::new(vector_size, Distance::Cosine)),
                )
                .await
                .map_err(|e| VectorIndexError::Collection(e.to_string()))?;
            Ok(())
        })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorIndexError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.client
                .delete_collection(&collection)
                .await
                .map_err(|e| VectorIndexError::Delete(e.to_string()))?;
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
            let points: Vec<PointStruct> =
                points.into_iter().map(to_point).collect::<Result<_, _>>()?;
            self.client
                .upsert_points(UpsertPointsBuilder::new(&collection, points))
                .await
                .map_err(|e| VectorIndexError::Upsert(e.to_string()))?;
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
            let mut builder =
                SearchPointsBuilder::new(&collection, vector, limit).with_payload(true);
            if let Some(filter) = to_filter(&filters) {
                builder = builder.filter(filter);
            }
            let results = self
                .client
                .search_points(builder)
                .await
                .map_err(|e| VectorIndexError::Search(e.to_string()))?;
            Ok(results.result.into_iter().filter_map(from_scored).collect())
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
            let ids: Vec<PointId> = ids.into_iter().map(|id| id.to_string().into()).collect();
            self.client
                .delete_points(DeletePointsBuilder::new(&collection).points(PointsIdsList { ids }))
                .await
                .map_err(|e| VectorIndexError::Delete(e.to_string()))?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_built_only_when_needed() {
        assert!(to_filter(&SearchFilters::default()).is_none());
        let filters = SearchFilters {
            category: Some("news".into()),
            created_after: Some(100),
            ..SearchFilters::default()
        };
        let filter = to_filter(&filters).expect("filter");
        assert_eq!(filter.must.len(), 2);
    }

    #[test]
    fn point_conversion_round_trips_payload() {
        let parent = DocumentId::new();
        let chunk_point = ChunkPoint {
            id: ChunkId::derive(parent, 3),
            vector: vec![0.1, 0.2],
            payload: ChunkPayload {
                parent_id: parent,
                ordinal: 3,
                category: Some("news".into()),
                author: None,
                created_at: 42,
            },
        };
        let point = to_point(chunk_point).expect("point");
        assert_eq!(
            point.payload.get("parent_id").and_then(|v| v.as_str()).map(String::as_str),
            Some(parent.to_string().as_str())
        );
        assert_eq!(point.payload.get("ordinal").and_then(qdrant_client::qdrant::Value::as_integer), Some(3));
    }
}
