//! Transport seam between the gateway and the upstream API.

use std::future::Future;

use crate::request::{EmbedRequest, GenerateReply, GenerateRequest};

/// Classified transport failure. The variant, not the message text, drives
/// retry and key-penalty decisions.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("rate limited")]
    RateLimited,

    #[error("service overloaded (status {status})")]
    Overloaded { status: u16 },

    #[error("API key rejected (status {status})")]
    InvalidKey { status: u16 },

    #[error("bad request: {message}")]
    BadRequest { message: String },

    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("empty response")]
    EmptyResponse,
}

impl TransportError {
    /// Whether the same key is worth retrying after a short delay.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Overloaded { .. } | Self::Network(_)
        )
    }
}

/// One upstream API. Implementations classify failures into
/// [`TransportError`] variants and detect safety blocks; they never retry.
pub trait Transport: Send + Sync {
    fn generate(
        &self,
        key: &str,
        request: &GenerateRequest,
    ) -> impl Future<Output = Result<GenerateReply, TransportError>> + Send;

    fn embed(
        &self,
        key: &str,
        request: &EmbedRequest,
    ) -> impl Future<Output = Result<Vec<f32>, TransportError>> + Send;
}
