//! Account and balance handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use creditgate_core::{Balance, Plan};

use crate::auth::Caller;
use crate::error::ApiError;
use crate::state::AppState;

/// Open account request.
#[derive(Debug, Default, Deserialize)]
pub struct OpenAccountRequest {
    /// Plan the monthly allowance derives from (default: free).
    #[serde(default)]
    pub plan: Plan,
}

/// Open a ledger for the calling subscriber.
pub async fn open_account(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(body): Json<OpenAccountRequest>,
) -> Result<(StatusCode, Json<Balance>), ApiError> {
    let balance = state
        .store
        .open_account(caller.subscriber_id, body.plan)
        .await?;

    tracing::info!(
        subscriber_id = %caller.subscriber_id,
        plan = %body.plan,
        "Account opened"
    );

    Ok((StatusCode::CREATED, Json(balance)))
}

/// Get the calling subscriber's balance as of the latest committed mutation.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<Balance>, ApiError> {
    let balance = state.store.get_balance(&caller.subscriber_id).await?;
    Ok(Json(balance))
}
