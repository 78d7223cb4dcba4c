use thiserror::Error;

/// Failure kinds of the freshness engine.
///
/// Only `ChainNotSupported` ever reaches a client (as a 404). Everything
/// else is transient: callers log it and fall back to cached or synthetic
/// data.
#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error("chain not supported: {0}")]
    ChainNotSupported(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("no pool at {0}")]
    PoolNotFound(String),

    #[error("storage unavailable: {0}")]
    Storage(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("token list fetch failed: {0}")]
    TokenList(String),
}

impl From<std::io::Error> for AggregatorError {
    fn from(e: std::io::Error) -> Self {
        AggregatorError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for AggregatorError {
    fn from(e: serde_json::Error) -> Self {
        AggregatorError::Storage(e.to_string())
    }
}
