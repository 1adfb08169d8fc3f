//! Error types for the retrieval pipeline.

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("gateway error: {0}")]
    Gateway(#[from] sibyl_gateway::GatewayError),

    #[error("storage error: {0}")]
    Memory(#[from] sibyl_memory::MemoryError),

    #[error("vector index error: {0}")]
    VectorIndex(#[from] sibyl_memory::VectorIndexError),

    #[error("integer conversion failed: {0}")]
    IntConversion(#[from] std::num::TryFromIntError),
}

pub type Result<T> = std::result::Result<T, RetrievalError>;
