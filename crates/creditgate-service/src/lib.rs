//! Creditgate HTTP metering service.
//!
//! This crate provides the server side of creditgate:
//!
//! - The authoritative usage guard and fixed-window rate limiter
//! - Metered execution with post-hoc reconciliation and shortfall handling
//! - Administrative balance adjustments and the audit trail
//! - A server-sent event stream of balance changes for client caches
//!
//! # Callers
//!
//! Requests arrive through a trusted gateway that presents the shared service
//! key and identifies the subscriber and actor in headers. See [`auth`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers stay async for a uniform router

pub mod auth;
pub mod config;
pub mod error;
pub mod guard;
pub mod handlers;
pub mod limiter;
pub mod metering;
pub mod operation;
pub mod routes;
pub mod state;

pub use config::{ServiceConfig, StoreBackend};
pub use error::ApiError;
pub use guard::{GuardCheck, UsageGuard};
pub use limiter::RateLimiter;
pub use metering::{MeteredRequest, MeteredResult, MeteringConfig, MeteringService};
pub use operation::{
    CostedOperation, HttpInference, OperationOutcome, OperationRequest, UnconfiguredOperation,
};
pub use routes::create_router;
pub use state::AppState;
