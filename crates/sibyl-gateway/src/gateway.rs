//! One logical call through the key pool: acquire, attempt, classify,
//! release, rotate.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::GatewayError;
use crate::keypool::{KeyLease, KeyPool, ReleaseOutcome};
use crate::request::{EmbedRequest, GenerateReply, GenerateRequest};
use crate::transport::{Transport, TransportError};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub generation_model: String,
    pub embedding_model: String,
    pub max_attempts_per_key: u32,
    pub retry_delay: Duration,
    pub attempt_timeout: Duration,
    /// Pool-wide budget for one logical call, rotation included.
    pub acquire_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            generation_model: "gemini-2.0-flash".into(),
            embedding_model: "text-embedding-004".into(),
            max_attempts_per_key: 2,
            retry_delay: Duration::from_millis(500),
            attempt_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(60),
        }
    }
}

/// What a run of same-key attempts ended with.
enum AttemptError {
    Timeout,
    Transport(TransportError),
}

pub struct Gateway<T: Transport> {
    transport: T,
    pool: Arc<KeyPool>,
    config: GatewayConfig,
}

impl<T: Transport> Gateway<T> {
    pub fn new(transport: T, pool: Arc<KeyPool>, config: GatewayConfig) -> Self {
        Self {
            transport,
            pool,
            config,
        }
    }

    #[must_use]
    pub fn generation_model(&self) -> &str {
        &self.config.generation_model
    }

    #[must_use]
    pub fn embedding_model(&self) -> &str {
        &self.config.embedding_model
    }

    /// Run one generation call, rotating keys until one succeeds or the
    /// pool is exhausted.
    ///
    /// A safety-refused call returns `Ok` with `blocked` set; the key that
    /// hit the refusal gets a short cooldown so a follow-up call lands on
    /// a different key.
    ///
    /// # Errors
    ///
    /// `GatewayError::Exhausted` when every key failed or cooled past the
    /// call budget, `GatewayError::InvalidRequest` for errors no rotation
    /// can fix.
    pub async fn generate(&self, request: &GenerateRequest) -> Result<GenerateReply, GatewayError> {
        let deadline = Instant::now() + self.config.acquire_timeout;
        loop {
            let lease = self.pool.acquire(deadline).await?;
            let key = lease.secret().to_owned();
            let result = self
                .run_attempts(|| self.transport.generate(&key, request))
                .await;
            match result {
                Ok(reply) if reply.blocked => {
                    tracing::warn!(model = %request.model, "generation safety-blocked");
                    lease.release(ReleaseOutcome::SafetyBlocked);
                    return Ok(reply);
                }
                Ok(reply) => {
                    lease.release(ReleaseOutcome::Success);
                    return Ok(reply);
                }
                Err(err) => self.rotate_or_fail(lease, err)?,
            }
        }
    }

    /// Embed one text. Same rotation semantics as [`Self::generate`].
    ///
    /// # Errors
    ///
    /// See [`Self::generate`].
    pub async fn embed(&self, request: &EmbedRequest) -> Result<Vec<f32>, GatewayError> {
        let deadline = Instant::now() + self.config.acquire_timeout;
        loop {
            let lease = self.pool.acquire(deadline).await?;
            let key = lease.secret().to_owned();
            let result = self
                .run_attempts(|| self.transport.embed(&key, request))
                .await;
            match result {
                Ok(vector) => {
                    lease.release(ReleaseOutcome::Success);
                    return Ok(vector);
                }
                Err(err) => self.rotate_or_fail(lease, err)?,
            }
        }
    }

    /// Up to `max_attempts_per_key` attempts on the leased key, a fixed
    /// delay between retryable failures, each attempt under its own
    /// timeout. Non-retryable errors stop the run immediately.
    async fn run_attempts<R, F, Fut>(&self, mut op: F) -> Result<R, AttemptError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, TransportError>>,
    {
        let mut last = AttemptError::Timeout;
        for attempt in 0..self.config.max_attempts_per_key {
            match tokio::time::timeout(self.config.attempt_timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if e.is_retryable() => {
                    tracing::debug!(error = %e, attempt, "retryable transport failure");
                    last = AttemptError::Transport(e);
                }
                Ok(Err(e)) => return Err(AttemptError::Transport(e)),
                Err(_) => last = AttemptError::Timeout,
            }
            if attempt + 1 < self.config.max_attempts_per_key {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }
        Err(last)
    }

    /// Release the lease according to the final error, then either let the
    /// caller rotate to the next key (`Ok`) or propagate (`Err`).
    fn rotate_or_fail(&self, lease: KeyLease, err: AttemptError) -> Result<(), GatewayError> {
        match err {
            AttemptError::Timeout => {
                tracing::warn!("attempt timed out, rotating key");
                lease.release(ReleaseOutcome::Retryable);
                Ok(())
            }
            AttemptError::Transport(e @ TransportError::InvalidKey { .. }) => {
                tracing::warn!(error = %e, "credential rejected, rotating key");
                lease.release(ReleaseOutcome::Fatal);
                Ok(())
            }
            AttemptError::Transport(e) if e.is_retryable() => {
                tracing::warn!(error = %e, "transient failure, rotating key");
                lease.release(ReleaseOutcome::Retryable);
                Ok(())
            }
            AttemptError::Transport(TransportError::BadRequest { message }) => {
                lease.release(ReleaseOutcome::Neutral);
                Err(GatewayError::InvalidRequest(message))
            }
            AttemptError::Transport(e) => {
                lease.release(ReleaseOutcome::Neutral);
                Err(GatewayError::Transport(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypool::PoolConfig;
    use crate::mock::MockTransport;
    use crate::request::Message;

    fn gateway(transport: MockTransport, keys: usize) -> Gateway<MockTransport> {
        let secrets = (0..keys).map(|i| format!("key-{i}")).collect();
        let pool = KeyPool::new(secrets, PoolConfig::default()).unwrap();
        let config = GatewayConfig {
            max_attempts_per_key: 2,
            retry_delay: Duration::from_millis(10),
            attempt_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(30),
            ..GatewayConfig::default()
        };
        Gateway::new(transport, pool, config)
    }

    fn request() -> GenerateRequest {
        GenerateRequest::new("test-model", vec![Message::user("hi")])
    }

    #[tokio::test(start_paused = true)]
    async fn rotates_to_second_key_after_invalid_key() {
        let transport = MockTransport::with_generate_script(vec![
            Err(TransportError::InvalidKey { status: 403 }),
            Ok(GenerateReply::text("ok")),
        ]);
        let gw = gateway(transport.clone(), 2);

        let reply = gw.generate(&request()).await.unwrap();
        assert_eq!(reply.text, "ok");
        let keys = transport.keys_seen();
        assert_eq!(keys.len(), 2);
        assert_ne!(keys[0], keys[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_same_key_on_rate_limit() {
        let transport = MockTransport::with_generate_script(vec![
            Err(TransportError::RateLimited),
            Ok(GenerateReply::text("ok")),
        ]);
        let gw = gateway(transport.clone(), 2);

        let reply = gw.generate(&request()).await.unwrap();
        assert_eq!(reply.text, "ok");
        let keys = transport.keys_seen();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0], keys[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn bad_request_propagates_without_rotation() {
        let transport = MockTransport::with_generate_script(vec![Err(
            TransportError::BadRequest {
                message: "unknown model".into(),
            },
        )]);
        let gw = gateway(transport.clone(), 3);

        let err = gw.generate(&request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(m) if m == "unknown model"));
        assert_eq!(transport.keys_seen().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn safety_block_is_not_an_error() {
        let transport =
            MockTransport::with_generate_script(vec![Ok(GenerateReply::safety_blocked())]);
        let gw = gateway(transport, 1);

        let reply = gw.generate(&request()).await.unwrap();
        assert!(reply.blocked);
        assert!(reply.text.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_surfaces_after_deadline() {
        let transport = MockTransport::with_generate_script(vec![
            Err(TransportError::RateLimited),
            Err(TransportError::RateLimited),
            Err(TransportError::RateLimited),
            Err(TransportError::RateLimited),
        ]);
        let secrets = vec!["a".into(), "b".into()];
        let pool = KeyPool::new(secrets, PoolConfig::default()).unwrap();
        let config = GatewayConfig {
            max_attempts_per_key: 2,
            retry_delay: Duration::from_millis(10),
            attempt_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(1),
            ..GatewayConfig::default()
        };
        let gw = Gateway::new(transport, pool, config);

        let err = gw.generate(&request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Exhausted));
    }

    #[tokio::test(start_paused = true)]
    async fn embed_rotates_like_generate() {
        let transport = MockTransport::with_embed_script(vec![
            Err(TransportError::InvalidKey { status: 401 }),
            Ok(vec![1.0, 2.0]),
        ]);
        let gw = gateway(transport.clone(), 2);

        let req = EmbedRequest {
            model: "embed-model".into(),
            text: "hello".into(),
            task: crate::request::EmbedTask::RetrievalQuery,
            title: None,
        };
        let vector = gw.embed(&req).await.unwrap();
        assert_eq!(vector, vec![1.0, 2.0]);
        assert_eq!(transport.keys_seen().len(), 2);
    }
}
