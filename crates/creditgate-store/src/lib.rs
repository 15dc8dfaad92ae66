//! Ledger storage for creditgate.
//!
//! The ledger is the only source of truth for balances and usage history.
//! Every mutation is atomic per subscriber: the balance check, the balance
//! update and the audit append either all commit or none do, and concurrent
//! mutations for one subscriber are serialized so no update is lost.
//!
//! # Backends
//!
//! - [`MemoryStore`]: per-subscriber locks over an in-process map (default)
//! - `RocksStore`: `RocksDB` column families, feature `rocksdb-backend`
//! - `PgStore`: conditional `UPDATE` in PostgreSQL, feature `postgres-backend`
//!
//! # Example
//!
//! ```
//! use creditgate_core::{CreditTarget, Plan, SubscriberId};
//! use creditgate_store::{LedgerStore, MemoryStore};
//!
//! # async fn example() -> creditgate_store::Result<()> {
//! let store = MemoryStore::new();
//! let id = SubscriberId::generate();
//!
//! store.open_account(id, Plan::Standard).await?;
//! store
//!     .credit(&id, 5000, CreditTarget::PurchasedBalance, "checkout", "billing")
//!     .await?;
//!
//! let balance = store.get_balance(&id).await?;
//! assert_eq!(balance.purchased_balance, 5000);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ledger;
pub mod memory;
pub mod notify;

#[cfg(feature = "rocksdb-backend")]
pub mod keys;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

#[cfg(feature = "postgres-backend")]
pub mod postgres;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use notify::ChangeHub;

#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

#[cfg(feature = "postgres-backend")]
pub use postgres::PgStore;

use async_trait::async_trait;
use tokio::sync::broadcast;

use creditgate_core::{AuditEntry, Balance, BalanceChange, CreditTarget, Plan, SubscriberId, UsageEvent};

/// The ledger trait defining all balance and audit operations.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // =========================================================================
    // Accounts
    // =========================================================================

    /// Create a ledger for a new subscriber.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the subscriber already has one.
    async fn open_account(&self, subscriber_id: SubscriberId, plan: Plan) -> Result<Balance>;

    /// Read the balance as of the latest committed mutation.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the subscriber has no ledger.
    async fn get_balance(&self, subscriber_id: &SubscriberId) -> Result<Balance>;

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Deduct `event.realized_cost` from the purchased balance and append the
    /// usage event, atomically.
    ///
    /// Returns the balance after the deduction.
    ///
    /// # Errors
    ///
    /// - `StoreError::InsufficientCredits` if the cost exceeds the purchased
    ///   balance. Nothing changes.
    /// - `StoreError::DuplicateEvent` if the event was already recorded.
    /// - `StoreError::InvalidAmount` for a negative cost.
    /// - `StoreError::NotFound` if the subscriber has no ledger.
    async fn deduct(&self, event: &UsageEvent) -> Result<Balance>;

    /// Add credits to one pool and append an adjustment event, atomically.
    ///
    /// # Errors
    ///
    /// - `StoreError::InvalidAmount` for a non-positive amount.
    /// - `StoreError::NotFound` if the subscriber has no ledger.
    async fn credit(
        &self,
        subscriber_id: &SubscriberId,
        amount: i64,
        target: CreditTarget,
        reason: &str,
        actor: &str,
    ) -> Result<Balance>;

    /// Reset the monthly allowance to the plan default and append an
    /// adjustment event, atomically.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the subscriber has no ledger.
    async fn reset_monthly(&self, subscriber_id: &SubscriberId, actor: &str) -> Result<Balance>;

    /// Record a usage event whose cost could not be deducted, together with
    /// a shortfall entry. The purchased balance is never touched.
    ///
    /// # Errors
    ///
    /// - `StoreError::DuplicateEvent` if the event was already recorded.
    /// - `StoreError::NotFound` if the subscriber has no ledger.
    async fn record_shortfall(&self, event: &UsageEvent, available: i64) -> Result<Balance>;

    // =========================================================================
    // Audit
    // =========================================================================

    /// List a subscriber's audit trail, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_audit(
        &self,
        subscriber_id: &SubscriberId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AuditEntry>>;

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Subscribe to change notifications for all subscribers.
    ///
    /// One notification is published per committed mutation.
    fn subscribe(&self) -> broadcast::Receiver<BalanceChange>;
}
