//! Multi-key gateway to a generative language model API.
//!
//! A [`KeyPool`] rotates between API keys, penalizing keys that fail and
//! cooling them down before reuse. The [`Gateway`] drives one logical call
//! through acquire, attempt, classify, and release so callers never deal
//! with key identities or transient failures.

pub mod error;
pub mod gateway;
pub mod http;
pub mod keypool;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod request;
pub mod transport;

pub use error::{GatewayError, Result};
pub use gateway::{Gateway, GatewayConfig};
pub use http::HttpTransport;
pub use keypool::{KeyLease, KeyPool, PoolConfig, ReleaseOutcome};
#[cfg(any(test, feature = "mock"))]
pub use mock::MockTransport;
pub use request::{EmbedRequest, EmbedTask, GenerateReply, GenerateRequest, Message, Role};
pub use transport::{Transport, TransportError};
