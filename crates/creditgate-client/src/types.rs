//! Request and response types for the creditgate client.

use serde::{Deserialize, Serialize};

use creditgate_core::{CreditTarget, GuardDecision, Plan, SubscriberId};

/// Open account request.
#[derive(Debug, Clone, Serialize)]
pub struct OpenAccountRequest {
    /// Plan the monthly allowance derives from.
    pub plan: Plan,
}

/// Guard check request.
#[derive(Debug, Clone, Serialize)]
pub struct GuardCheckRequest {
    /// Feature tag.
    pub feature: String,
    /// Output-unit ceiling (optional, defaults to the feature's).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_units: Option<i64>,
}

/// Authoritative guard check response.
#[derive(Debug, Clone, Deserialize)]
pub struct GuardCheckResponse {
    /// Whether the request may proceed.
    #[serde(flatten)]
    pub decision: GuardDecision,
    /// Purchased balance the decision was based on.
    pub purchased_balance: i64,
    /// Worst-case cost of the request.
    pub ceiling_cost: i64,
}

/// Metered operation request.
#[derive(Debug, Clone, Serialize)]
pub struct MeteredRequest {
    /// Feature tag to bill under.
    pub feature: String,
    /// Output-unit ceiling (optional, defaults to the feature's).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_units: Option<i64>,
    /// Payload for the costed operation.
    pub input: serde_json::Value,
}

impl MeteredRequest {
    /// A request for `feature` with the feature's default ceiling.
    #[must_use]
    pub fn new(feature: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            feature: feature.into(),
            max_output_units: None,
            input,
        }
    }
}

/// Metered operation response.
#[derive(Debug, Clone, Deserialize)]
pub struct MeteredResponse {
    /// Output of the costed operation.
    pub output: serde_json::Value,
    /// Usage event recorded for the call.
    pub event_id: String,
    /// Realized cost in credits.
    pub realized_cost: i64,
    /// Purchased balance after reconciliation.
    pub balance_after: i64,
    /// True if the cost could not be collected.
    pub shortfall: bool,
}

/// Balance adjustment request.
#[derive(Debug, Clone, Serialize)]
pub struct AdjustRequest {
    /// Subscriber to credit.
    pub subscriber_id: SubscriberId,
    /// Pool to credit.
    pub target: CreditTarget,
    /// Credits to add.
    pub amount: i64,
    /// Reason recorded in the audit trail.
    pub reason: String,
}

/// Monthly reset request.
#[derive(Debug, Clone, Serialize)]
pub struct ResetMonthlyRequest {
    /// Subscriber whose allowance is reset.
    pub subscriber_id: SubscriberId,
}

/// API error response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details.
    pub error: ApiErrorDetail,
}

/// API error details.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorDetail {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Error class (`remedy`, `policy`, `transient`, `fatal`, `internal`).
    #[serde(default)]
    pub class: Option<String>,
    /// Additional details.
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}
