use super::SqliteStore;
use crate::error::MemoryError;
use crate::types::{DocumentId, ParentDocument, SearchFilters};

type DocumentRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    i64,
    String,
);

const DOCUMENT_COLUMNS: &str =
    "id, collection, title, full_text, category, author, created_at, metadata";

fn document_from_row(row: DocumentRow) -> Result<ParentDocument, MemoryError> {
    let (id, collection, title, full_text, category, author, created_at, metadata) = row;
    Ok(ParentDocument {
        id: DocumentId::parse(&id)?,
        collection,
        title,
        full_text,
        category,
        author,
        created_at,
        metadata: serde_json::from_str(&metadata)?,
    })
}

impl SqliteStore {
    /// Insert or overwrite a parent document row.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn upsert_document(
        &self,
        document: &ParentDocument,
        content_hash: &str,
    ) -> Result<(), MemoryError> {
        sqlx::query(
            "INSERT INTO documents \
             (id, collection, title, full_text, category, author, created_at, metadata, content_hash) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
             collection = excluded.collection, title = excluded.title, \
             full_text = excluded.full_text, category = excluded.category, \
             author = excluded.author, created_at = excluded.created_at, \
             metadata = excluded.metadata, content_hash = excluded.content_hash",
        )
        .bind(document.id.to_string())
        .bind(&document.collection)
        .bind(&document.title)
        .bind(&document.full_text)
        .bind(&document.category)
        .bind(&document.author)
        .bind(document.created_at)
        .bind(document.metadata.to_string())
        .bind(content_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stored content hash for the unchanged-document skip, `None` when
    /// the document is not indexed yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn document_hash(&self, id: DocumentId) -> Result<Option<String>, MemoryError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT content_hash FROM documents WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(hash,)| hash))
    }

    /// Fetch documents by id, preserving the order of `ids`. Missing ids
    /// are silently skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails or a stored row is malformed.
    pub async fn get_documents(
        &self,
        ids: &[DocumentId],
    ) -> Result<Vec<ParentDocument>, MemoryError> {
        let mut documents = Vec::with_capacity(ids.len());
        for id in ids {
            let row: Option<DocumentRow> = sqlx::query_as(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?"
            ))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = row {
                documents.push(document_from_row(row)?);
            }
        }
        Ok(documents)
    }

    /// Delete a document. Chunk rows cascade, and the FTS delete trigger
    /// fires for each cascaded chunk. Returns whether a row was deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete_document(&self, id: DocumentId) -> Result<bool, MemoryError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Most recent documents in a collection matching the filters. This is
    /// the metadata-browse path: no embedding, no relevance ranking.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored row is malformed.
    pub async fn browse(
        &self,
        collection: &str,
        filters: &SearchFilters,
        limit: u32,
    ) -> Result<Vec<ParentDocument>, MemoryError> {
        let rows: Vec<DocumentRow> = sqlx::query_as(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents \
             WHERE collection = ? \
             AND (? IS NULL OR category = ?) \
             AND (? IS NULL OR author = ?) \
             AND (? IS NULL OR created_at >= ?) \
             ORDER BY created_at DESC LIMIT ?"
        ))
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

        rows.into_iter().map(document_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_document(collection: &str, title: &str, text: &str) -> ParentDocument {
        ParentDocument {
            id: DocumentId::new(),
            collection: collection.into(),
            title: title.into(),
            full_text: text.into(),
            category: None,
            author: None,
            created_at: 1_700_000_000,
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn upsert_overwrites_not_duplicates() {
        let store = SqliteStore::new(":memory:").await.unwrap();
        let mut doc = sample_document("kb", "title", "first version");
        store.upsert_document(&doc, "hash-1").await.unwrap();

        doc.full_text = "second version".into();
        store.upsert_document(&doc, "hash-2").await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);

        let fetched = store.get_documents(&[doc.id]).await.unwrap();
        assert_eq!(fetched[0].full_text, "second version");
        assert_eq!(store.document_hash(doc.id).await.unwrap().as_deref(), Some("hash-2"));
    }

    #[tokio::test]
    async fn get_documents_preserves_order() {
        let store = SqliteStore::new(":memory:").await.unwrap();
        let a = sample_document("kb", "a", "text a");
        let b = sample_document("kb", "b", "text b");
        store.upsert_document(&a, "h").await.unwrap();
        store.upsert_document(&b, "h").await.unwrap();

        let fetched = store.get_documents(&[b.id, a.id]).await.unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].id, b.id);
        assert_eq!(fetched[1].id, a.id);
    }

    #[tokio::test]
    async fn browse_orders_by_recency_and_applies_filters() {
        let store = SqliteStore::new(":memory:").await.unwrap();
        let mut old = sample_document("kb", "old", "old text");
        old.created_at = 100;
        old.category = Some("news".into());
        let mut new = sample_document("kb", "new", "new text");
        new.created_at = 200;
        new.category = Some("news".into());
        let mut other = sample_document("kb", "other", "other text");
        other.created_at = 300;
        other.category = Some("misc".into());
        for doc in [&old, &new, &other] {
            store.upsert_document(doc, "h").await.unwrap();
        }

        let filters = SearchFilters {
            category: Some("news".into()),
            ..SearchFilters::default()
        };
        let found = store.browse("kb", &filters, 10).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, new.id);
        assert_eq!(found[1].id, old.id);

        let floor = SearchFilters {
            created_after: Some(150),
            ..SearchFilters::default()
        };
        let found = store.browse("kb", &floor, 10).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|d| d.created_at >= 150));
    }

    #[tokio::test]
    async fn delete_missing_document_returns_false() {
        let store = SqliteStore::new(":memory:").await.unwrap();
        assert!(!store.delete_document(DocumentId::new()).await.unwrap());
    }
}
