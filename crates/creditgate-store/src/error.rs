//! Error types for creditgate storage.

use creditgate_core::MeterError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// No ledger for this subscriber.
    #[error("account not found: {subscriber_id}")]
    NotFound {
        /// The subscriber that was looked up.
        subscriber_id: String,
    },

    /// A ledger already exists for this subscriber.
    #[error("account already exists: {subscriber_id}")]
    AlreadyExists {
        /// The subscriber that was opened twice.
        subscriber_id: String,
    },

    /// Deduction larger than the purchased balance.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current purchased balance.
        balance: i64,
        /// Requested deduction.
        required: i64,
    },

    /// Duplicate event (idempotency check failed).
    #[error("duplicate event: {event_id}")]
    DuplicateEvent {
        /// The event ID that was duplicated.
        event_id: String,
    },

    /// Zero, negative or overflowing amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

impl From<StoreError> for MeterError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { subscriber_id } => Self::AccountNotFound { subscriber_id },
            StoreError::AlreadyExists { subscriber_id } => {
                Self::AccountAlreadyExists { subscriber_id }
            }
            StoreError::InsufficientCredits { balance, required } => {
                Self::InsufficientCredits { balance, required }
            }
            StoreError::DuplicateEvent { event_id } => Self::DuplicateEvent { event_id },
            StoreError::InvalidAmount(msg) => Self::InvalidAmount(msg),
            StoreError::Database(msg) | StoreError::Serialization(msg) => {
                Self::StoreUnavailable(msg)
            }
        }
    }
}
