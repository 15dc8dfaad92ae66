//! Audit trail types for creditgate.
//!
//! Every balance-affecting event is appended to the subscriber's audit trail.
//! Entries are immutable and ordered by their ULID.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Balance, CreditTarget, EventId, SubscriberId, UsageEvent};

/// Actor name recorded for monthly resets run by the billing-cycle job.
pub const BILLING_CYCLE_ACTOR: &str = "billing-cycle";

/// An administrative change to a balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminAdjustmentEvent {
    /// Unique, time-ordered event ID.
    pub id: EventId,

    /// The subscriber whose balance changed.
    pub subscriber_id: SubscriberId,

    /// What kind of adjustment was made.
    pub kind: AdjustmentKind,

    /// Pool that was adjusted.
    pub target: CreditTarget,

    /// Amount added (credits) or the new allowance (resets).
    pub amount: i64,

    /// Who made the change.
    pub actor: String,

    /// Why the change was made.
    pub reason: String,

    /// Value of the targeted pool after the change.
    pub balance_after: i64,

    /// When the change was made.
    pub created_at: DateTime<Utc>,
}

impl AdminAdjustmentEvent {
    /// Record a credit applied to `balance` (already mutated).
    #[must_use]
    pub fn credit(
        balance: &Balance,
        target: CreditTarget,
        amount: i64,
        reason: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        let balance_after = match target {
            CreditTarget::MonthlyAllowance => balance.monthly_allowance,
            CreditTarget::PurchasedBalance => balance.purchased_balance,
        };
        Self {
            id: EventId::generate(),
            subscriber_id: balance.subscriber_id,
            kind: AdjustmentKind::Credit,
            target,
            amount,
            actor: actor.into(),
            reason: reason.into(),
            balance_after,
            created_at: Utc::now(),
        }
    }

    /// Record a monthly reset applied to `balance` (already mutated).
    #[must_use]
    pub fn monthly_reset(balance: &Balance, actor: impl Into<String>) -> Self {
        Self {
            id: EventId::generate(),
            subscriber_id: balance.subscriber_id,
            kind: AdjustmentKind::ResetMonthly,
            target: CreditTarget::MonthlyAllowance,
            amount: balance.monthly_allowance,
            actor: actor.into(),
            reason: format!("monthly reset to {} plan allowance", balance.plan),
            balance_after: balance.monthly_allowance,
            created_at: Utc::now(),
        }
    }
}

/// Kind of administrative adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    /// Credits added to a pool.
    Credit,
    /// Monthly allowance reset to the plan default.
    ResetMonthly,
}

/// A realized cost that could not be deducted after the result was delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortfallEvent {
    /// Unique, time-ordered event ID.
    pub id: EventId,

    /// The subscriber whose deduction failed.
    pub subscriber_id: SubscriberId,

    /// The usage event that could not be charged.
    pub usage_event_id: EventId,

    /// The realized cost that was requested.
    pub requested: i64,

    /// The purchased balance observed when the deduction failed.
    pub available: i64,

    /// When the shortfall was recorded.
    pub created_at: DateTime<Utc>,
}

impl ShortfallEvent {
    /// Create a shortfall entry for an uncollected usage event.
    #[must_use]
    pub fn for_usage(event: &UsageEvent, available: i64) -> Self {
        Self {
            id: EventId::generate(),
            subscriber_id: event.subscriber_id,
            usage_event_id: event.id,
            requested: event.realized_cost,
            available,
            created_at: Utc::now(),
        }
    }
}

/// A single entry in a subscriber's append-only audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum AuditEntry {
    /// A metered operation.
    Usage(UsageEvent),
    /// A credit or reset.
    Adjustment(AdminAdjustmentEvent),
    /// A reconciliation shortfall.
    Shortfall(ShortfallEvent),
}

impl AuditEntry {
    /// The entry's time-ordered ID.
    #[must_use]
    pub fn id(&self) -> EventId {
        match self {
            Self::Usage(e) => e.id,
            Self::Adjustment(e) => e.id,
            Self::Shortfall(e) => e.id,
        }
    }

    /// The subscriber the entry belongs to.
    #[must_use]
    pub fn subscriber_id(&self) -> SubscriberId {
        match self {
            Self::Usage(e) => e.subscriber_id,
            Self::Adjustment(e) => e.subscriber_id,
            Self::Shortfall(e) => e.subscriber_id,
        }
    }
}

/// Notification published after every committed balance mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    /// The subscriber whose balance changed.
    pub subscriber_id: SubscriberId,
    /// Which mutation committed.
    pub kind: ChangeKind,
    /// Purchased balance after the mutation.
    pub purchased_balance: i64,
}

impl BalanceChange {
    /// Build a change notification from the committed balance.
    #[must_use]
    pub fn new(balance: &Balance, kind: ChangeKind) -> Self {
        Self {
            subscriber_id: balance.subscriber_id,
            kind,
            purchased_balance: balance.purchased_balance,
        }
    }
}

/// Kind of committed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// A usage deduction.
    Deduct,
    /// An administrative credit.
    Credit,
    /// A monthly allowance reset.
    ResetMonthly,
    /// A recorded shortfall.
    Shortfall,
}
