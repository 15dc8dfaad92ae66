//! Caller identification.
//!
//! The service sits behind a trusted gateway that has already authenticated
//! the session. The gateway presents the shared service key and forwards who
//! is calling:
//!
//! - `x-api-key` - shared service key (required)
//! - `x-subscriber-id` - subscriber UUID the call acts on (required)
//! - `x-actor` - display name recorded in audit entries (default: subscriber id)
//! - `x-actor-role` - `admin` for administrators

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use creditgate_core::{Actor, SubscriberId};

use crate::error::ApiError;
use crate::state::AppState;

/// Role header value that marks an administrator.
const ADMIN_ROLE: &str = "admin";

/// An identified caller acting on one subscriber's ledger.
#[derive(Debug, Clone)]
pub struct Caller {
    /// The subscriber the call acts on.
    pub subscriber_id: SubscriberId,
    /// Who is calling.
    pub actor: Actor,
}

impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = ApiError;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut Parts,
        state: &'life1 Arc<AppState>,
    ) -> ::core::pin::Pin<
        Box<
            dyn ::core::future::Future<Output = Result<Self, Self::Rejection>>
                + ::core::marker::Send
                + 'async_trait,
        >,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            verify_service_key(&parts.headers, state)?;

            let subscriber_id = header(&parts.headers, "x-subscriber-id")
                .ok_or_else(|| ApiError::BadRequest("missing x-subscriber-id header".into()))?
                .parse::<SubscriberId>()
                .map_err(|e| ApiError::BadRequest(format!("invalid x-subscriber-id: {e}")))?;

            let name = header(&parts.headers, "x-actor")
                .map_or_else(|| subscriber_id.to_string(), str::to_string);

            let actor = if header(&parts.headers, "x-actor-role") == Some(ADMIN_ROLE) {
                Actor::admin(name)
            } else {
                Actor::subscriber(name)
            };

            Ok(Self {
                subscriber_id,
                actor,
            })
        })
    }
}

/// A caller that must be an administrator.
///
/// Used for admin-only endpoints like balance adjustments.
#[derive(Debug, Clone)]
pub struct AdminCaller {
    /// The administrator, for audit entries.
    pub actor: Actor,
}

impl FromRequestParts<Arc<AppState>> for AdminCaller {
    type Rejection = ApiError;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut Parts,
        state: &'life1 Arc<AppState>,
    ) -> ::core::pin::Pin<
        Box<
            dyn ::core::future::Future<Output = Result<Self, Self::Rejection>>
                + ::core::marker::Send
                + 'async_trait,
        >,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            verify_service_key(&parts.headers, state)?;

            if header(&parts.headers, "x-actor-role") != Some(ADMIN_ROLE) {
                return Err(ApiError::Forbidden("admin role required".into()));
            }

            let name = header(&parts.headers, "x-actor").unwrap_or("admin");
            tracing::info!(actor = %name, "Admin caller identified");

            Ok(Self {
                actor: Actor::admin(name),
            })
        })
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn verify_service_key(headers: &HeaderMap, state: &AppState) -> Result<(), ApiError> {
    let presented = header(headers, "x-api-key").ok_or(ApiError::Unauthorized)?;

    let expected = state
        .config
        .service_api_key
        .as_ref()
        .ok_or(ApiError::Unauthorized)?;

    if presented != expected {
        return Err(ApiError::Unauthorized);
    }
    Ok(())
}
