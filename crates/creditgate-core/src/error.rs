//! Error types for creditgate.

use crate::ids::IdError;
use crate::policy::RejectReason;

/// Result type for creditgate operations.
pub type Result<T> = std::result::Result<T, MeterError>;

/// How a caller should react to an error.
///
/// User-facing surfaces show a purchase prompt for [`ErrorClass::Remedy`],
/// no prompt for [`ErrorClass::Policy`] (the request itself must change) and
/// a retry affordance for [`ErrorClass::Transient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Buying more credits fixes it.
    Remedy,
    /// The request violates policy and must change.
    Policy,
    /// Retrying later may succeed.
    Transient,
    /// The call failed permanently and will not be retried.
    Fatal,
    /// A caller or system error unrelated to credits.
    Internal,
}

impl ErrorClass {
    /// Get the class name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Remedy => "remedy",
            Self::Policy => "policy",
            Self::Transient => "transient",
            Self::Fatal => "fatal",
            Self::Internal => "internal",
        }
    }
}

/// Errors that can occur in creditgate operations.
#[derive(Debug, thiserror::Error)]
pub enum MeterError {
    /// The usage guard refused admission.
    #[error("request rejected: {0}")]
    Rejected(RejectReason),

    /// Too many calls in the current rate-limit window.
    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited {
        /// Milliseconds until the current window closes.
        retry_after_ms: u64,
    },

    /// The costed operation finished without a usable realized cost.
    #[error("metering error: {0}")]
    Metering(String),

    /// The realized cost could not be deducted after the result was delivered.
    #[error("reconciliation shortfall: requested={requested}, available={available}")]
    ReconciliationShortfall {
        /// The realized cost.
        requested: i64,
        /// The purchased balance observed.
        available: i64,
    },

    /// The ledger could not be reached in time.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The costed operation itself failed before producing a result.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Deduction larger than the purchased balance.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current purchased balance.
        balance: i64,
        /// Requested deduction.
        required: i64,
    },

    /// Account not found.
    #[error("account not found: {subscriber_id}")]
    AccountNotFound {
        /// The subscriber ID that was not found.
        subscriber_id: String,
    },

    /// Account already exists.
    #[error("account already exists: {subscriber_id}")]
    AccountAlreadyExists {
        /// The subscriber ID that already exists.
        subscriber_id: String,
    },

    /// Duplicate usage event (idempotency).
    #[error("duplicate event: {event_id}")]
    DuplicateEvent {
        /// The event ID that was duplicated.
        event_id: String,
    },

    /// Invalid amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The feature tag is not in the catalog.
    #[error("unknown feature: {0}")]
    UnknownFeature(String),

    /// The actor may not perform this operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl MeterError {
    /// Classify the error for user-visible handling.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Rejected(reason) => reason.class(),
            Self::InsufficientCredits { .. } => ErrorClass::Remedy,
            Self::RateLimited { .. } | Self::StoreUnavailable(_) | Self::Upstream(_) => {
                ErrorClass::Transient
            }
            Self::Metering(_) | Self::ReconciliationShortfall { .. } => ErrorClass::Fatal,
            Self::UnknownFeature(_) | Self::InvalidAmount(_) => ErrorClass::Policy,
            Self::AccountNotFound { .. }
            | Self::AccountAlreadyExists { .. }
            | Self::DuplicateEvent { .. }
            | Self::Forbidden(_)
            | Self::InvalidId(_)
            | Self::Configuration(_) => ErrorClass::Internal,
        }
    }
}
