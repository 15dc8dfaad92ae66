//! Balance change stream.
//!
//! One server-sent event is emitted per committed mutation of the caller's
//! ledger. A listener that falls behind the notification buffer receives a
//! `resync` event and should refetch its balance.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::auth::Caller;
use crate::error::ApiError;
use crate::state::AppState;

/// Event name for a committed change.
pub const BALANCE_CHANGED_EVENT: &str = "balance_changed";

/// Event name asking the listener to refetch.
pub const RESYNC_EVENT: &str = "resync";

/// Stream the calling subscriber's balance changes.
pub async fn balance_stream(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // Subscribe before the existence check so nothing committed in between is missed.
    let changes = BroadcastStream::new(state.store.subscribe());
    state.store.get_balance(&caller.subscriber_id).await?;

    let subscriber_id = caller.subscriber_id;
    tracing::debug!(subscriber_id = %subscriber_id, "Balance stream opened");

    let events = changes.filter_map(move |item| match item {
        Ok(change) if change.subscriber_id == subscriber_id => {
            match Event::default().event(BALANCE_CHANGED_EVENT).json_data(&change) {
                Ok(event) => Some(Ok(event)),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to encode balance change");
                    Some(Ok(Event::default().event(RESYNC_EVENT).data("encode")))
                }
            }
        }
        Ok(_) => None,
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::debug!(
                subscriber_id = %subscriber_id,
                skipped = skipped,
                "Balance stream lagged"
            );
            Some(Ok(Event::default().event(RESYNC_EVENT).data("lagged")))
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
