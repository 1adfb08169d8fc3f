use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("no API keys configured")]
    NoKeys,

    #[error("all API keys exhausted or cooling")]
    Exhausted,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
