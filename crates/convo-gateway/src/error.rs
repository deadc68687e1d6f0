use thiserror::Error;

/// Surfaced to the Gateway by a [`crate::provider::Provider`] — it must
/// distinguish parse/structural failures (recoverable via rewrite) from
/// transport failures (recoverable via retry, then fatal).
#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    #[error("invalid_json:{0}")]
    Parse(String),

    #[error("transport error (status {status:?}): {message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },

    #[error("request timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("provider response invalid after exhausting rewrites: {0}")]
    ProviderParse(String),

    #[error("request_timed_out")]
    RequestTimedOut,

    #[error("network error: {0}")]
    Network(String),

    #[error("contract violation after exhausting rewrites: {0}")]
    ContractViolation(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
