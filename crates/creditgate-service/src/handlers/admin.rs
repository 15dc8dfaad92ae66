//! Administrative handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use creditgate_core::{AuditEntry, Balance, CreditTarget, SubscriberId};

use crate::auth::AdminCaller;
use crate::error::ApiError;
use crate::state::AppState;

/// Largest audit page served.
const MAX_AUDIT_LIMIT: usize = 500;

/// Balance adjustment request.
#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    /// Subscriber to credit.
    pub subscriber_id: SubscriberId,
    /// Pool to credit.
    pub target: CreditTarget,
    /// Credits to add. Must be positive.
    pub amount: i64,
    /// Reason recorded in the audit trail.
    pub reason: String,
}

/// Credit a subscriber's balance.
pub async fn adjust_balance(
    State(state): State<Arc<AppState>>,
    admin: AdminCaller,
    Json(body): Json<AdjustRequest>,
) -> Result<Json<Balance>, ApiError> {
    if body.reason.trim().is_empty() {
        return Err(ApiError::BadRequest("reason must not be empty".into()));
    }

    let balance = state
        .metering
        .adjust_balance(
            &body.subscriber_id,
            body.target,
            body.amount,
            &body.reason,
            &admin.actor,
        )
        .await?;
    Ok(Json(balance))
}

/// Monthly reset request.
#[derive(Debug, Deserialize)]
pub struct ResetMonthlyRequest {
    /// Subscriber whose allowance is reset.
    pub subscriber_id: SubscriberId,
}

/// Reset a subscriber's monthly allowance to the plan default.
pub async fn reset_monthly(
    State(state): State<Arc<AppState>>,
    admin: AdminCaller,
    Json(body): Json<ResetMonthlyRequest>,
) -> Result<Json<Balance>, ApiError> {
    let balance = state
        .metering
        .reset_monthly(&body.subscriber_id, &admin.actor)
        .await?;
    Ok(Json(balance))
}

/// Audit list query parameters.
#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    /// Maximum number of entries to return (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// List a subscriber's audit trail, newest first.
pub async fn list_audit(
    State(state): State<Arc<AppState>>,
    _admin: AdminCaller,
    Path(subscriber_id): Path<String>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditEntry>>, ApiError> {
    let subscriber_id = subscriber_id
        .parse::<SubscriberId>()
        .map_err(|e| ApiError::BadRequest(format!("invalid subscriber id: {e}")))?;

    let entries = state
        .store
        .list_audit(
            &subscriber_id,
            query.limit.min(MAX_AUDIT_LIMIT),
            query.offset,
        )
        .await?;
    Ok(Json(entries))
}
