//! Hybrid search: vector and keyword rankings fused per collection,
//! deduplicated to parent documents.

use std::collections::HashMap;
use std::sync::Arc;

use sibyl_gateway::{EmbedRequest, EmbedTask, Gateway, Transport};
use sibyl_memory::{ChunkId, DocumentId, SearchFilters, SqliteStore, VectorIndex};
use tokio::sync::Semaphore;

use crate::fusion::fuse;

#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Candidates pulled from the vector index per collection.
    pub k_vector: u32,
    /// Candidates pulled from the keyword index per collection.
    pub k_fts: u32,
    /// Rank-smoothing constant for reciprocal rank fusion.
    pub rrf_k: u32,
    /// Fused chunks kept per collection before parent dedup.
    pub final_k: usize,
    /// Parent documents kept per collection.
    pub max_parent_docs: usize,
    /// Collections searched concurrently.
    pub concurrency_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            k_vector: 20,
            k_fts: 20,
            rrf_k: 60,
            final_k: 12,
            max_parent_docs: 4,
            concurrency_limit: 4,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    pub collections: Vec<String>,
    pub filters: SearchFilters,
    /// Overall cap on returned passages; defaults to `max_parent_docs`.
    pub limit: Option<usize>,
}

/// One parent document surfaced by search.
#[derive(Debug, Clone)]
pub struct Passage {
    pub parent_id: DocumentId,
    pub collection: String,
    pub title: String,
    pub content: String,
    pub score: f64,
}

pub struct HybridRetriever<T: Transport> {
    store: SqliteStore,
    vectors: Arc<dyn VectorIndex>,
    gateway: Arc<Gateway<T>>,
    config: SearchConfig,
}

impl<T: Transport> HybridRetriever<T> {
    pub fn new(
        store: SqliteStore,
        vectors: Arc<dyn VectorIndex>,
        gateway: Arc<Gateway<T>>,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            vectors,
            gateway,
            config,
        }
    }

    /// Search the requested collections. Never fails: a backend that
    /// errors contributes nothing, so a broken embedder degrades to
    /// keyword-only search and a broken database to vector-only.
    ///
    /// An empty query with filters falls back to a metadata browse by
    /// recency; an empty query without filters returns nothing.
    pub async fn search(self: &Arc<Self>, request: &SearchRequest) -> Vec<Passage> {
        let query = request.query.trim();
        if query.is_empty() {
            if request.filters.is_empty() {
                return Vec::new();
            }
            return self.browse(request).await;
        }

        let query_vector = self.embed_query(query).await;
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency_limit.max(1)));
        let tasks = request.collections.iter().map(|collection| {
            let retriever = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let vector = query_vector.clone();
            let collection = collection.clone();
            let query = query.to_owned();
            let filters = request.filters.clone();
            async move {
                let _permit = semaphore.acquire().await;
                retriever
                    .search_collection(&collection, &query, vector, &filters)
                    .await
            }
        });

        let mut passages: Vec<Passage> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .flatten()
            .collect();
        passages.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        passages.truncate(request.limit.unwrap_or(self.config.max_parent_docs));
        passages
    }

    /// Embed the query, or degrade to keyword-only on failure.
    async fn embed_query(&self, query: &str) -> Option<Vec<f32>> {
        let request = EmbedRequest {
            model: self.gateway.embedding_model().to_owned(),
            text: query.to_owned(),
            task: EmbedTask::RetrievalQuery,
            title: None,
        };
        match self.gateway.embed(&request).await {
            Ok(vector) => Some(vector),
            Err(err) => {
                tracing::warn!(error = %err, "query embedding failed, keyword-only search");
                None
            }
        }
    }

    async fn search_collection(
        &self,
        collection: &str,
        query: &str,
        query_vector: Option<Vec<f32>>,
        filters: &SearchFilters,
    ) -> Vec<Passage> {
        let vector_hits: Vec<(ChunkId, DocumentId)> = match query_vector {
            Some(vector) => match self
                .vectors
                .search(
                    collection,
                    vector,
                    u64::from(self.config.k_vector),
                    filters.clone(),
                )
                .await
            {
                Ok(hits) => hits
                    .into_iter()
                    .map(|hit| (hit.id, hit.payload.parent_id))
                    .collect(),
                Err(err) => {
                    tracing::warn!(collection, error = %err, "vector search failed");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let keyword_hits: Vec<(ChunkId, DocumentId)> = match self
            .store
            .keyword_search(collection, query, self.config.k_fts, filters)
            .await
        {
            Ok(hits) => hits
                .into_iter()
                .map(|hit| (hit.chunk_id, hit.parent_id))
                .collect(),
            Err(err) => {
                tracing::warn!(collection, error = %err, "keyword search failed");
                Vec::new()
            }
        };

        let fused = fuse(
            &vector_hits,
            &keyword_hits,
            self.config.rrf_k,
            self.config.final_k,
        );

        // Best chunk score per parent; fused order is descending, so the
        // first sighting wins.
        let mut best: HashMap<DocumentId, f64> = HashMap::new();
        let mut parents: Vec<DocumentId> = Vec::new();
        for chunk in fused {
            if !best.contains_key(&chunk.parent_id) && parents.len() < self.config.max_parent_docs {
                parents.push(chunk.parent_id);
            }
            best.entry(chunk.parent_id).or_insert(chunk.score);
        }

        match self.store.get_documents(&parents).await {
            Ok(documents) => documents
                .into_iter()
                .map(|doc| Passage {
                    score: best.get(&doc.id).copied().unwrap_or_default(),
                    parent_id: doc.id,
                    collection: doc.collection,
                    title: doc.title,
                    content: doc.full_text,
                })
                .collect(),
            Err(err) => {
                tracing::warn!(collection, error = %err, "parent fetch failed");
                Vec::new()
            }
        }
    }

    /// Metadata browse: most recent documents matching the filters, no
    /// relevance ranking.
    async fn browse(&self, request: &SearchRequest) -> Vec<Passage> {
        let limit = request.limit.unwrap_or(self.config.max_parent_docs);
        let per_collection = u32::try_from(limit).unwrap_or(u32::MAX);
        let mut documents = Vec::new();
        for collection in &request.collections {
            match self
                .store
                .browse(collection, &request.filters, per_collection)
                .await
            {
                Ok(found) => documents.extend(found),
                Err(err) => {
                    tracing::warn!(collection, error = %err, "browse failed");
                }
            }
        }
        // Each collection comes back newest-first; the merged list must be
        // re-sorted or the request's collection order decides the cut.
        documents.sort_by_key(|doc| std::cmp::Reverse(doc.created_at));
        documents.truncate(limit);
        documents
            .into_iter()
            .map(|doc| Passage {
                parent_id: doc.id,
                collection: doc.collection,
                title: doc.title,
                content: doc.full_text,
                score: 0.0,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use sibyl_gateway::{GatewayConfig, KeyPool, MockTransport, PoolConfig};
    use sibyl_memory::{
        ChunkPayload, ChunkPoint, ChunkRecord, InMemoryVectorIndex, ParentDocument,
    };

    async fn retriever(transport: MockTransport) -> (Arc<HybridRetriever<MockTransport>>, SqliteStore, Arc<dyn VectorIndex>) {
        let store = SqliteStore::new(":memory:").await.unwrap();
        let pool = KeyPool::new(vec!["k".into()], PoolConfig::default()).unwrap();
        let config = GatewayConfig {
            max_attempts_per_key: 1,
            retry_delay: Duration::from_millis(1),
            acquire_timeout: Duration::from_millis(100),
            ..GatewayConfig::default()
        };
        let gateway = Arc::new(Gateway::new(transport, pool, config));
        let vectors: Arc<dyn VectorIndex> = Arc::new(InMemoryVectorIndex::new());
        let retriever = Arc::new(HybridRetriever::new(
            store.clone(),
            Arc::clone(&vectors),
            gateway,
            SearchConfig::default(),
        ));
        (retriever, store, vectors)
    }

    async fn seed(
        store: &SqliteStore,
        vectors: &Arc<dyn VectorIndex>,
        title: &str,
        text: &str,
        embedding: Vec<f32>,
    ) -> DocumentId {
        let doc = ParentDocument {
            id: DocumentId::new(),
            collection: "kb".into(),
            title: title.into(),
            full_text: text.into(),
            category: None,
            author: None,
            created_at: 1_700_000_000,
            metadata: serde_json::json!({}),
        };
        store.upsert_document(&doc, "h").await.unwrap();
        let id = ChunkId::derive(doc.id, 0);
        store
            .replace_chunks(
                doc.id,
                &[ChunkRecord {
                    id,
                    parent_id: doc.id,
                    ordinal: 0,
                    collection: "kb".into(),
                    content: text.into(),
                }],
            )
            .await
            .unwrap();
        vectors.ensure_collection("kb", 2).await.unwrap();
        vectors
            .upsert(
                "kb",
                vec![ChunkPoint {
                    id,
                    vector: embedding,
                    payload: ChunkPayload {
                        parent_id: doc.id,
                        ordinal: 0,
                        category: None,
                        author: None,
                        created_at: 1_700_000_000,
                    },
                }],
            )
            .await
            .unwrap();
        doc.id
    }

    fn request(query: &str) -> SearchRequest {
        SearchRequest {
            query: query.into(),
            collections: vec!["kb".into()],
            ..SearchRequest::default()
        }
    }

    #[tokio::test]
    async fn hybrid_agreement_ranks_first() {
        // Embedder maps dog-queries near the dog document.
        let transport = MockTransport::with_embedder(|text| {
            if text.contains("dog") {
                vec![1.0, 0.0]
            } else {
                vec![0.0, 1.0]
            }
        });
        let (retriever, store, vectors) = retriever(transport).await;
        let dog = seed(&store, &vectors, "dogs", "dogs bark at strangers", vec![1.0, 0.0]).await;
        seed(&store, &vectors, "cats", "cats nap in the sun", vec![0.0, 1.0]).await;

        let passages = retriever.search(&request("why do dogs bark")).await;
        assert!(!passages.is_empty());
        assert_eq!(passages[0].parent_id, dog);
    }

    #[tokio::test]
    async fn embed_failure_degrades_to_keyword_only() {
        let (retriever, store, vectors) = retriever(MockTransport::failing_embed()).await;
        let dog = seed(&store, &vectors, "dogs", "dogs bark at strangers", vec![1.0, 0.0]).await;

        let passages = retriever.search(&request("bark")).await;
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].parent_id, dog);
    }

    #[tokio::test]
    async fn empty_query_without_filters_is_empty() {
        let (retriever, store, vectors) = retriever(MockTransport::default()).await;
        seed(&store, &vectors, "dogs", "dogs bark", vec![1.0, 0.0]).await;

        assert!(retriever.search(&request("   ")).await.is_empty());
    }

    #[tokio::test]
    async fn empty_query_with_filters_browses_by_recency() {
        let (retriever, store, _vectors) = retriever(MockTransport::default()).await;
        for (title, created_at) in [("old", 100), ("new", 200)] {
            let doc = ParentDocument {
                id: DocumentId::new(),
                collection: "kb".into(),
                title: title.into(),
                full_text: format!("{title} text"),
                category: Some("news".into()),
                author: None,
                created_at,
                metadata: serde_json::json!({}),
            };
            store.upsert_document(&doc, "h").await.unwrap();
        }

        let mut req = request("");
        req.filters.category = Some("news".into());
        let passages = retriever.search(&req).await;
        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].title, "new");
        assert!(passages.iter().all(|p| (p.score - 0.0).abs() < f64::EPSILON));
    }

    #[tokio::test]
    async fn browse_merges_collections_by_recency() {
        let (retriever, store, _vectors) = retriever(MockTransport::default()).await;
        // The newest document lives in the collection listed last.
        for (collection, title, created_at) in
            [("notes", "stale", 100), ("notes", "middle", 200), ("wiki", "fresh", 300)]
        {
            let doc = ParentDocument {
                id: DocumentId::new(),
                collection: collection.into(),
                title: title.into(),
                full_text: format!("{title} text"),
                category: Some("news".into()),
                author: None,
                created_at,
                metadata: serde_json::json!({}),
            };
            store.upsert_document(&doc, "h").await.unwrap();
        }

        let mut req = request("");
        req.collections = vec!["notes".into(), "wiki".into()];
        req.filters.category = Some("news".into());
        req.limit = Some(2);
        let passages = retriever.search(&req).await;
        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].title, "fresh");
        assert_eq!(passages[1].title, "middle");
    }

    #[tokio::test]
    async fn limit_caps_passages() {
        let transport = MockTransport::with_embedder(|_| vec![1.0, 0.0]);
        let (retriever, store, vectors) = retriever(transport).await;
        for i in 0..5 {
            seed(
                &store,
                &vectors,
                &format!("doc-{i}"),
                "dogs bark at strangers",
                vec![1.0, 0.0],
            )
            .await;
        }

        // Without an explicit limit, max_parent_docs caps the parents.
        let passages = retriever.search(&request("dogs bark")).await;
        assert_eq!(passages.len(), SearchConfig::default().max_parent_docs);

        let mut req = request("dogs bark");
        req.limit = Some(2);
        assert_eq!(retriever.search(&req).await.len(), 2);
    }
}
