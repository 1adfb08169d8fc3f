//! Test-only scripted transport.

use std::sync::{Arc, Mutex};

use crate::request::{EmbedRequest, GenerateReply, GenerateRequest};
use crate::transport::{Transport, TransportError};

type Embedder = dyn Fn(&str) -> Vec<f32> + Send + Sync;

/// Scripted [`Transport`]. Pops one scripted result per call, falling back
/// to a fixed default; records every key it was handed.
#[derive(Clone)]
pub struct MockTransport {
    generate_script: Arc<Mutex<Vec<Result<GenerateReply, TransportError>>>>,
    embed_script: Arc<Mutex<Vec<Result<Vec<f32>, TransportError>>>>,
    keys_seen: Arc<Mutex<Vec<String>>>,
    embedder: Option<Arc<Embedder>>,
    pub default_reply: String,
    pub default_embedding: Vec<f32>,
    pub fail_embed: bool,
    /// Milliseconds to sleep before answering.
    pub delay_ms: u64,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            generate_script: Arc::new(Mutex::new(Vec::new())),
            embed_script: Arc::new(Mutex::new(Vec::new())),
            keys_seen: Arc::new(Mutex::new(Vec::new())),
            embedder: None,
            default_reply: "mock reply".into(),
            default_embedding: vec![0.0; 8],
            fail_embed: false,
            delay_ms: 0,
        }
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("default_reply", &self.default_reply)
            .field("fail_embed", &self.fail_embed)
            .finish()
    }
}

impl MockTransport {
    #[must_use]
    pub fn with_generate_script(script: Vec<Result<GenerateReply, TransportError>>) -> Self {
        Self {
            generate_script: Arc::new(Mutex::new(script)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_embed_script(script: Vec<Result<Vec<f32>, TransportError>>) -> Self {
        Self {
            embed_script: Arc::new(Mutex::new(script)),
            ..Self::default()
        }
    }

    /// Derive embeddings from the input text instead of a fixed vector.
    #[must_use]
    pub fn with_embedder(f: impl Fn(&str) -> Vec<f32> + Send + Sync + 'static) -> Self {
        Self {
            embedder: Some(Arc::new(f)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing_embed() -> Self {
        Self {
            fail_embed: true,
            ..Self::default()
        }
    }

    /// Keys handed to the transport, in call order.
    #[must_use]
    pub fn keys_seen(&self) -> Vec<String> {
        self.keys_seen.lock().unwrap().clone()
    }

    fn record(&self, key: &str) {
        self.keys_seen.lock().unwrap().push(key.to_owned());
    }
}

impl Transport for MockTransport {
    async fn generate(
        &self,
        key: &str,
        _request: &GenerateRequest,
    ) -> Result<GenerateReply, TransportError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        self.record(key);
        let mut script = self.generate_script.lock().unwrap();
        if script.is_empty() {
            Ok(GenerateReply::text(self.default_reply.clone()))
        } else {
            script.remove(0)
        }
    }

    async fn embed(&self, key: &str, request: &EmbedRequest) -> Result<Vec<f32>, TransportError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        self.record(key);
        if self.fail_embed {
            return Err(TransportError::Overloaded { status: 503 });
        }
        if let Some(ref embedder) = self.embedder {
            return Ok(embedder(&request.text));
        }
        let mut script = self.embed_script.lock().unwrap();
        if script.is_empty() {
            Ok(self.default_embedding.clone())
        } else {
            script.remove(0)
        }
    }
}
