//! Creditgate Client SDK.
//!
//! This crate provides a client library for applications consuming the
//! creditgate metering service:
//!
//! - [`CreditGateClient`]: typed HTTP client for the service API
//! - [`BalanceCache`]: read-only balance snapshots with TTL and
//!   stale-while-revalidate
//! - [`SyncContext`]: ref-counted real-time balance subscriptions with
//!   debounced refresh and bounded reconnection
//!
//! # Example
//!
//! ```no_run
//! use creditgate_client::{CreditGateClient, MeteredRequest, SyncContext, SyncOptions};
//! use creditgate_core::SubscriberId;
//!
//! # async fn example() -> Result<(), creditgate_client::ClientError> {
//! let client = CreditGateClient::new(
//!     "http://creditgate.billing.svc:8080",
//!     "your-service-api-key",
//! )?;
//! let subscriber_id = SubscriberId::generate();
//!
//! let result = client
//!     .perform_metered(
//!         &subscriber_id,
//!         &MeteredRequest::new("chat", serde_json::json!({ "prompt": "hi" })),
//!     )
//!     .await?;
//! println!("Charged {} credits", result.realized_cost);
//!
//! let sync = SyncContext::from_client(client, SyncOptions::default());
//! let _subscription = sync.subscribe(subscriber_id, |balance| {
//!     println!("Balance is now {}", balance.purchased_balance);
//! });
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod cache;
mod client;
mod error;
mod feed;
mod scheduler;
mod sync;
mod types;

pub use cache::{BalanceCache, BalanceSource, DEFAULT_TTL};
pub use client::{ClientOptions, CreditGateClient};
pub use error::ClientError;
pub use feed::{ChangeFeed, FeedEvent, FeedStream, SseChangeFeed};
pub use scheduler::{Debouncer, ScheduledTask};
pub use sync::{Subscription, SyncContext, SyncOptions, SyncState, DEFAULT_DEBOUNCE};
pub use types::*;
