//! Retrieval pipeline: indexing, hybrid search, and query rewriting.
//!
//! Documents are rendered, split, embedded, and stored by the
//! [`DocumentIndexer`]; the [`HybridRetriever`] fuses vector and keyword
//! rankings with Reciprocal Rank Fusion and returns parent-level
//! [`Passage`]s; the [`QueryRewriter`] turns conversational utterances
//! into standalone search queries.

pub mod error;
pub mod fusion;
pub mod indexer;
pub mod render;
pub mod retriever;
pub mod rewriter;

pub use error::{Result, RetrievalError};
pub use indexer::{DocumentIndexer, IndexOutcome, IndexReport, IndexerConfig};
pub use render::{IndexInput, RecordKind, render_record};
pub use retriever::{HybridRetriever, Passage, SearchConfig, SearchRequest};
pub use rewriter::{HistoryTurn, QueryRewriter, RewriteConfig};
