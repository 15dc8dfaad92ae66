//! Balance types for creditgate.
//!
//! A subscriber's balance has two pools. The monthly allowance is a recurring
//! quota that is tracked and reset on the billing cycle but never spent from.
//! The purchased balance is the spendable, non-expiring pool every metered
//! operation is charged against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::SubscriberId;

// ============================================================================
// Constants
// ============================================================================

/// Standard plan monthly allowance.
pub const STANDARD_PLAN_ALLOWANCE: i64 = 2500;

/// Pro plan monthly allowance.
pub const PRO_PLAN_ALLOWANCE: i64 = 6000;

/// Enterprise plan monthly allowance.
pub const ENTERPRISE_PLAN_ALLOWANCE: i64 = 100_000;

/// The ledger record for a single subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// The subscriber this balance belongs to.
    pub subscriber_id: SubscriberId,

    /// Plan used to derive the monthly allowance on reset.
    pub plan: Plan,

    /// Recurring quota for the current cycle. Informational ceiling only.
    pub monthly_allowance: i64,

    /// Spendable credits. Never negative.
    pub purchased_balance: i64,

    /// Total credits ever deducted. Never decreases.
    pub lifetime_used: i64,

    /// Total realized cost that could not be collected because the balance
    /// was already drained. Never decreases.
    pub lifetime_shortfall: i64,

    /// When the balance was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    /// Create a balance for a new subscriber on the given plan.
    ///
    /// The monthly allowance starts at the plan default and the purchased pool
    /// starts empty.
    #[must_use]
    pub fn new(subscriber_id: SubscriberId, plan: Plan) -> Self {
        Self {
            subscriber_id,
            monthly_allowance: plan.monthly_allowance(),
            plan,
            purchased_balance: 0,
            lifetime_used: 0,
            lifetime_shortfall: 0,
            updated_at: Utc::now(),
        }
    }

    /// Check if the purchased pool covers a deduction.
    #[must_use]
    pub fn can_cover(&self, amount: i64) -> bool {
        self.purchased_balance >= amount
    }
}

/// Which pool a credit adjustment targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditTarget {
    /// The recurring monthly allowance.
    MonthlyAllowance,

    /// The spendable purchased pool.
    PurchasedBalance,
}

impl CreditTarget {
    /// Get the target name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MonthlyAllowance => "monthly_allowance",
            Self::PurchasedBalance => "purchased_balance",
        }
    }
}

/// Available subscription plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    /// No recurring allowance, purchased credits only.
    #[default]
    Free,

    /// Standard plan.
    Standard,

    /// Pro plan.
    Pro,

    /// Enterprise plan.
    Enterprise,
}

impl Plan {
    /// Get the monthly allowance this plan resets to.
    #[must_use]
    pub const fn monthly_allowance(&self) -> i64 {
        match self {
            Self::Free => 0,
            Self::Standard => STANDARD_PLAN_ALLOWANCE,
            Self::Pro => PRO_PLAN_ALLOWANCE,
            Self::Enterprise => ENTERPRISE_PLAN_ALLOWANCE,
        }
    }

    /// Get the plan name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Standard => "standard",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "standard" => Ok(Self::Standard),
            "pro" => Ok(Self::Pro),
            "enterprise" => Ok(Self::Enterprise),
            other => Err(format!("unknown plan: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_balance_starts_with_plan_allowance_and_empty_pool() {
        let balance = Balance::new(SubscriberId::generate(), Plan::Pro);
        assert_eq!(balance.monthly_allowance, 6000);
        assert_eq!(balance.purchased_balance, 0);
        assert_eq!(balance.lifetime_used, 0);
        assert_eq!(balance.lifetime_shortfall, 0);
    }

    #[test]
    fn can_cover_is_inclusive() {
        let mut balance = Balance::new(SubscriberId::generate(), Plan::Free);
        balance.purchased_balance = 300;

        assert!(balance.can_cover(299));
        assert!(balance.can_cover(300));
        assert!(!balance.can_cover(301));
    }

    #[test]
    fn plan_round_trips_through_str() {
        for plan in [Plan::Free, Plan::Standard, Plan::Pro, Plan::Enterprise] {
            assert_eq!(plan.as_str().parse::<Plan>(), Ok(plan));
        }
        assert!("gold".parse::<Plan>().is_err());
    }
}
