//! Connector error taxonomy

use thiserror::Error;

/// Custom result type for connector operations
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Errors surfaced by the connector runtime and venue adapters.
///
/// Transport failures during a cache refresh are swallowed by the caches
/// (logged, prior state served); the variants here reach callers only on
/// paths the contract defines as synchronous failures.
#[derive(Debug, Clone, Error)]
pub enum ConnectorError {
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Request timed out after {millis} ms")]
    Timeout { millis: u64 },

    #[error("Unknown symbol: {symbol}")]
    UnknownSymbol { symbol: String },

    #[error("Unsupported capability: {capability}")]
    Unsupported { capability: String },

    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl ConnectorError {
    /// Whether this error is a network-level failure that cache refresh
    /// paths absorb into staleness instead of raising.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode {
            message: err.to_string(),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ConnectorError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }
}
