//! Document indexing: render, hash, split, embed, store.

use std::sync::Arc;

use sibyl_gateway::{EmbedRequest, EmbedTask, Gateway, Transport};
use sibyl_memory::{
    ChunkId, ChunkPayload, ChunkPoint, ChunkRecord, DocumentId, ParentDocument, SqliteStore,
    VectorIndex, splitter::split_text,
};
use tokio::sync::Semaphore;

use crate::error::{Result, RetrievalError};
use crate::render::{IndexInput, render_record};

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Upper bound on chunk size, in characters.
    pub max_chars: usize,
    /// Concurrent documents in a batch.
    pub concurrency_limit: usize,
    /// Dimension of the embedding model's output.
    pub vector_dim: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            max_chars: 1000,
            concurrency_limit: 4,
            vector_dim: 768,
        }
    }
}

/// What happened to one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    /// Written with this many chunks.
    Indexed { chunks: usize },
    /// Content hash unchanged, nothing touched.
    Skipped,
}

/// Batch result. Per-document failures are collected, not fatal.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub documents_indexed: usize,
    pub documents_skipped: usize,
    pub chunks_written: usize,
    pub errors: Vec<(String, RetrievalError)>,
}

pub struct DocumentIndexer<T: Transport> {
    store: SqliteStore,
    vectors: Arc<dyn VectorIndex>,
    gateway: Arc<Gateway<T>>,
    config: IndexerConfig,
}

impl<T: Transport> DocumentIndexer<T> {
    pub fn new(
        store: SqliteStore,
        vectors: Arc<dyn VectorIndex>,
        gateway: Arc<Gateway<T>>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            store,
            vectors,
            gateway,
            config,
        }
    }

    /// Index one record. The fingerprint covers the rendered text and
    /// every stored column, so an unchanged record matches its stored
    /// `content_hash` and the whole pipeline is skipped, while a
    /// metadata-only edit still rewrites the document.
    /// Chunk ids derive from `(parent, ordinal)`, which makes
    /// re-indexing overwrite vectors in place; ordinals past the new chunk
    /// count are deleted explicitly.
    ///
    /// # Errors
    ///
    /// Returns an error when embedding or either store fails. A failed
    /// document leaves its previous version intact.
    pub async fn index_document(&self, input: IndexInput) -> Result<IndexOutcome> {
        let parent_id = input.id.unwrap_or_default();
        let full_text = render_record(&input);
        let content_hash = fingerprint(&input, &full_text);

        if self.store.document_hash(parent_id).await? == Some(content_hash.clone()) {
            tracing::debug!(%parent_id, "content hash unchanged, skipping");
            return Ok(IndexOutcome::Skipped);
        }

        let chunks = split_text(&full_text, self.config.max_chars);
        let previous = self.store.chunks_for_document(parent_id).await?.len();

        let mut points = Vec::with_capacity(chunks.len());
        let mut records = Vec::with_capacity(chunks.len());
        for (ordinal, content) in chunks.iter().enumerate() {
            let ordinal = u32::try_from(ordinal)?;
            let vector = self
                .gateway
                .embed(&EmbedRequest {
                    model: self.gateway.embedding_model().to_owned(),
                    text: content.clone(),
                    task: EmbedTask::RetrievalDocument,
                    title: Some(input.title.clone()),
                })
                .await?;
            let id = ChunkId::derive(parent_id, ordinal);
            points.push(ChunkPoint {
                id,
                vector,
                payload: ChunkPayload {
                    parent_id,
                    ordinal,
                    category: input.category.clone(),
                    author: input.author.clone(),
                    created_at: input.created_at,
                },
            });
            records.push(ChunkRecord {
                id,
                parent_id,
                ordinal,
                collection: input.collection.clone(),
                content: content.clone(),
            });
        }

        self.vectors
            .ensure_collection(&input.collection, self.config.vector_dim)
            .await?;

        let document = ParentDocument {
            id: parent_id,
            collection: input.collection.clone(),
            title: input.title.clone(),
            full_text,
            category: input.category.clone(),
            author: input.author.clone(),
            created_at: input.created_at,
            metadata: input.metadata.clone(),
        };
        self.store.upsert_document(&document, &content_hash).await?;
        self.store.replace_chunks(parent_id, &records).await?;

        // A shorter re-index leaves stale high ordinals in the vector index.
        if previous > records.len() {
            let stale: Vec<ChunkId> = (records.len()..previous)
                .map(|ordinal| Ok(ChunkId::derive(parent_id, u32::try_from(ordinal)?)))
                .collect::<Result<_>>()?;
            self.vectors.delete_by_ids(&input.collection, stale).await?;
        }

        let written = points.len();
        self.vectors.upsert(&input.collection, points).await?;
        tracing::info!(%parent_id, chunks = written, "document indexed");
        Ok(IndexOutcome::Indexed { chunks: written })
    }

    /// Index a batch with bounded concurrency. Failures are reported per
    /// document and never abort the batch.
    pub async fn index_documents(self: &Arc<Self>, inputs: Vec<IndexInput>) -> IndexReport {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency_limit.max(1)));
        let tasks = inputs.into_iter().map(|input| {
            let indexer = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await;
                let title = input.title.clone();
                (title, indexer.index_document(input).await)
            }
        });

        let mut report = IndexReport::default();
        for (title, result) in futures::future::join_all(tasks).await {
            match result {
                Ok(IndexOutcome::Indexed { chunks }) => {
                    report.documents_indexed += 1;
                    report.chunks_written += chunks;
                }
                Ok(IndexOutcome::Skipped) => report.documents_skipped += 1,
                Err(err) => {
                    tracing::warn!(%title, error = %err, "document failed to index");
                    report.errors.push((title, err));
                }
            }
        }
        report
    }

    /// Remove a document everywhere: SQLite row (chunks cascade) and the
    /// matching vector points. Returns whether the document existed.
    ///
    /// # Errors
    ///
    /// Returns an error when either store fails.
    pub async fn delete_document(&self, collection: &str, id: DocumentId) -> Result<bool> {
        let ids: Vec<ChunkId> = self
            .store
            .chunks_for_document(id)
            .await?
            .into_iter()
            .map(|chunk| chunk.id)
            .collect();
        let existed = self.store.delete_document(id).await?;
        if !ids.is_empty() {
            self.vectors.delete_by_ids(collection, ids).await?;
        }
        Ok(existed)
    }
}

/// Change-detection hash over everything `index_document` persists. The
/// rendered text alone is not enough: metadata, author, or collection can
/// change without altering a single rendered character.
fn fingerprint(input: &IndexInput, full_text: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    for field in [
        full_text,
        input.collection.as_str(),
        input.category.as_deref().unwrap_or(""),
        input.author.as_deref().unwrap_or(""),
    ] {
        hasher.update(field.as_bytes());
        hasher.update(&[0]);
    }
    hasher.update(&input.created_at.to_le_bytes());
    hasher.update(input.metadata.to_string().as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use sibyl_gateway::{GatewayConfig, KeyPool, MockTransport, PoolConfig};
    use sibyl_memory::{InMemoryVectorIndex, SearchFilters};

    async fn build(transport: MockTransport) -> Arc<DocumentIndexer<MockTransport>> {
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
        Arc::new(DocumentIndexer::new(
            store,
            vectors,
            gateway,
            IndexerConfig {
                max_chars: 40,
                ..IndexerConfig::default()
            },
        ))
    }

    fn input(id: DocumentId, body: &str) -> IndexInput {
        IndexInput {
            id: Some(id),
            collection: "kb".into(),
            title: "doc".into(),
            category: None,
            author: None,
            created_at: 1_700_000_000,
            metadata: serde_json::json!({}),
            body: body.into(),
        }
    }

    #[tokio::test]
    async fn unchanged_document_is_skipped() {
        let indexer = build(MockTransport::default()).await;
        let id = DocumentId::new();

        let first = indexer.index_document(input(id, "Dogs bark.")).await.unwrap();
        assert!(matches!(first, IndexOutcome::Indexed { .. }));

        let second = indexer.index_document(input(id, "Dogs bark.")).await.unwrap();
        assert_eq!(second, IndexOutcome::Skipped);
    }

    #[tokio::test]
    async fn metadata_only_edit_is_reindexed() {
        let indexer = build(MockTransport::default()).await;
        let id = DocumentId::new();

        let mut doc = input(id, "Dogs bark.");
        doc.metadata = serde_json::json!({ "source": "old" });
        indexer.index_document(doc).await.unwrap();

        // Same body, different stored columns: must rewrite, not skip.
        let mut doc = input(id, "Dogs bark.");
        doc.metadata = serde_json::json!({ "source": "new" });
        doc.author = Some("ada".into());
        let outcome = indexer.index_document(doc).await.unwrap();
        assert!(matches!(outcome, IndexOutcome::Indexed { .. }));

        let stored = indexer.store.get_documents(&[id]).await.unwrap();
        assert_eq!(stored[0].metadata, serde_json::json!({ "source": "new" }));
        assert_eq!(stored[0].author.as_deref(), Some("ada"));
    }

    #[tokio::test]
    async fn shorter_reindex_prunes_stale_vectors() {
        let indexer = build(MockTransport::default()).await;
        let id = DocumentId::new();

        let long = "Dogs bark loudly at night. Cats purr softly all day. \
                    Birds sing in the morning hours.";
        let first = indexer.index_document(input(id, long)).await.unwrap();
        let IndexOutcome::Indexed { chunks: before } = first else {
            panic!("expected indexed");
        };
        assert!(before > 1);

        let second = indexer.index_document(input(id, "Dogs bark.")).await.unwrap();
        let IndexOutcome::Indexed { chunks: after } = second else {
            panic!("expected indexed");
        };
        assert!(after < before);

        let results = indexer
            .vectors
            .search("kb", vec![0.0; 8], 100, SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(results.len(), after);
    }

    #[tokio::test]
    async fn batch_reports_failures_without_aborting() {
        let indexer = build(MockTransport::failing_embed()).await;
        let report = indexer
            .index_documents(vec![input(DocumentId::new(), "will fail")])
            .await;
        assert_eq!(report.documents_indexed, 0);
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test]
    async fn delete_clears_both_stores() {
        let indexer = build(MockTransport::default()).await;
        let id = DocumentId::new();
        indexer.index_document(input(id, "Dogs bark.")).await.unwrap();

        assert!(indexer.delete_document("kb", id).await.unwrap());
        assert!(!indexer.delete_document("kb", id).await.unwrap());

        let results = indexer
            .vectors
            .search("kb", vec![0.0; 8], 100, SearchFilters::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
