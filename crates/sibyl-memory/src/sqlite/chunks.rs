use super::SqliteStore;
use crate::error::MemoryError;
use crate::types::{ChunkId, ChunkRecord, DocumentId, SearchFilters};

/// One keyword-search result at chunk granularity, best match first.
#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub chunk_id: ChunkId,
    pub parent_id: DocumentId,
    pub ordinal: u32,
    pub content: String,
}

/// Build an FTS5 MATCH expression from free text. Tokens are stripped to
/// alphanumerics and quoted, so user input can never inject FTS syntax.
/// `None` when nothing searchable remains.
fn fts_match_expr(query: &str) -> Option<String> {
    let tokens: Vec<String> = query
        .split_whitespace()
        .map(|t| t.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

impl SqliteStore {
    /// Replace every chunk of a document in one transaction. Delete and
    /// insert triggers keep the FTS index in sync, and stale ordinals from
    /// a previous, longer version disappear with the delete.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement in the transaction fails.
    pub async fn replace_chunks(
        &self,
        parent_id: DocumentId,
        chunks: &[ChunkRecord],
    ) -> Result<(), MemoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(parent_id.to_string())
            .execute(&mut *tx)
            .await?;
        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (id, document_id, ordinal, collection, content) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(chunk.id.to_string())
            .bind(chunk.parent_id.to_string())
            .bind(chunk.ordinal)
            .bind(&chunk.collection)
            .bind(&chunk.content)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Chunks of one document ordered by ordinal.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored row is malformed.
    pub async fn chunks_for_document(
        &self,
        parent_id: DocumentId,
    ) -> Result<Vec<ChunkRecord>, MemoryError> {
        let rows: Vec<(String, String, u32, String, String)> = sqlx::query_as(
            "SELECT id, document_id, ordinal, collection, content \
             FROM chunks WHERE document_id = ? ORDER BY ordinal",
        )
        .bind(parent_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, document_id, ordinal, collection, content)| {
                Ok(ChunkRecord {
                    id: ChunkId::parse(&id)?,
                    parent_id: DocumentId::parse(&document_id)?,
                    ordinal,
                    collection,
                    content,
                })
            })
            .collect()
    }

    /// BM25-ranked keyword search at chunk level, filters pushed into the
    /// query. An unsearchable query (no alphanumeric tokens) returns empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored row is malformed.
    pub async fn keyword_search(
        &self,
        collection: &str,
        query: &str,
        limit: u32,
        filters: &SearchFilters,
    ) -> Result<Vec<KeywordHit>, MemoryError> {
        let Some(match_expr) = fts_match_expr(query) else {
            return Ok(Vec::new());
        };

        let rows: Vec<(String, String, u32, String)> = sqlx::query_as(
            "SELECT c.id, c.document_id, c.ordinal, c.content \
             FROM chunks_fts f \
             JOIN chunks c ON c.rowid = f.rowid \
             JOIN documents d ON d.id = c.document_id \
             WHERE chunks_fts MATCH ? \
             AND c.collection = ? \
             AND (? IS NULL OR d.category = ?) \
             AND (? IS NULL OR d.author = ?) \
             AND (? IS NULL OR d.created_at >= ?) \
             ORDER BY bm25(chunks_fts) LIMIT ?",
        )
        .bind(match_expr)
        .bind(collection)
        .bind(&filters.category)
        .bind(&filters.category)
        .bind(&filters.author)
        .bind(&filters.author)
        .bind(filters.created_after)
        .bind(filters.created_after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, document_id, ordinal, content)| {
                Ok(KeywordHit {
                    chunk_id: ChunkId::parse(&id)?,
                    parent_id: DocumentId::parse(&document_id)?,
                    ordinal,
                    content,
                })
            })
            .collect()
    }
}
