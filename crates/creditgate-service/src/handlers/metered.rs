//! Guard and metered-operation handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::auth::Caller;
use crate::error::ApiError;
use crate::guard::GuardCheck;
use crate::metering::{MeteredRequest, MeteredResult};
use crate::state::AppState;

/// Guard check request.
#[derive(Debug, Deserialize)]
pub struct GuardCheckRequest {
    /// Feature tag.
    pub feature: String,
    /// Output-unit ceiling. Defaults to the feature's ceiling.
    #[serde(default)]
    pub max_output_units: Option<i64>,
}

/// Run the authoritative guard without performing anything.
///
/// A rejection is reported in the body with status 200; only failures to
/// evaluate are errors.
pub async fn check_guard(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(body): Json<GuardCheckRequest>,
) -> Result<Json<GuardCheck>, ApiError> {
    let check = state
        .metering
        .check_guard(
            &caller.subscriber_id,
            &caller.actor,
            &body.feature,
            body.max_output_units,
        )
        .await?;
    Ok(Json(check))
}

/// Admit, perform and reconcile one costed operation.
pub async fn perform_metered(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(body): Json<MeteredRequest>,
) -> Result<Json<MeteredResult>, ApiError> {
    let result = state
        .metering
        .perform_metered_operation(&caller.subscriber_id, &caller.actor, body)
        .await?;
    Ok(Json(result))
}
