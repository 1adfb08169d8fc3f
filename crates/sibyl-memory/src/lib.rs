//! Document and chunk storage for the retrieval engine.
//!
//! Parents and chunks live in SQLite; an FTS5 shadow table supplies the
//! keyword index, and a [`VectorIndex`] implementation holds the chunk
//! embeddings.

pub mod error;
pub mod in_memory_index;
pub mod qdrant_index;
pub mod splitter;
pub mod sqlite;
pub mod types;
pub mod vector_index;

pub use error::MemoryError;
pub use in_memory_index::InMemoryVectorIndex;
pub use qdrant_index::QdrantVectorIndex;
pub use splitter::{Splitter, SplitterConfig};
pub use sqlite::SqliteStore;
pub use types::{ChunkId, ChunkRecord, DocumentId, ParentDocument, SearchFilters};
pub use vector_index::{ChunkPayload, ChunkPoint, ScoredChunk, VectorIndex, VectorIndexError};
