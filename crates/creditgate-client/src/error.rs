//! Client error types.

/// Errors that can occur when using the creditgate client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned an error response.
    #[error("API error: {code} - {message}")]
    Api {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
        /// HTTP status code.
        status: u16,
    },

    /// The usage guard refused the request.
    #[error("rejected: {code} - {message}")]
    Rejected {
        /// Rejection code (e.g. `low_balance_block`).
        code: String,
        /// Error message.
        message: String,
        /// Whether buying credits would lift the rejection.
        remedy: bool,
    },

    /// Too many metered calls in the current window.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited {
        /// Time left in the window.
        retry_after_ms: u64,
    },

    /// The ledger could not be reached.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Account not found.
    #[error("account not found")]
    AccountNotFound,

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Whether retrying later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::RateLimited { .. } | Self::StoreUnavailable(_)
        )
    }
}
