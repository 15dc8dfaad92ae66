//! Admission policy for metered operations.
//!
//! [`GuardPolicy::evaluate`] is the pure decision shared by the authoritative
//! server-side guard and the advisory client-side check. Only the server-side
//! result may gate a call; the client copy runs against a cached balance.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::ErrorClass;
use crate::Balance;

/// Default security buffer in credits.
pub const DEFAULT_SECURITY_BUFFER: i64 = 2000;

/// Default ceiling for the worst-case cost of a single request.
pub const DEFAULT_MAX_SINGLE_REQUEST_COST: i64 = 5000;

/// Default timeout for the authoritative balance load.
pub const DEFAULT_GUARD_TIMEOUT: Duration = Duration::from_secs(2);

/// Thresholds applied by the usage guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardPolicy {
    /// Minimum purchased balance required to start a non-admin request.
    pub security_buffer: i64,

    /// Largest worst-case cost allowed for one request, regardless of balance.
    pub max_single_request_cost: i64,

    /// Optional cap on a subscriber's cumulative uncollected cost.
    pub max_cumulative_shortfall: Option<i64>,

    /// Bound on the authoritative balance load. On expiry the guard fails closed.
    pub timeout: Duration,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            security_buffer: DEFAULT_SECURITY_BUFFER,
            max_single_request_cost: DEFAULT_MAX_SINGLE_REQUEST_COST,
            max_cumulative_shortfall: None,
            timeout: DEFAULT_GUARD_TIMEOUT,
        }
    }
}

impl GuardPolicy {
    /// Decide whether `actor` may start a request whose worst-case cost is
    /// `ceiling_cost`, given the subscriber's current balance.
    ///
    /// Admins are always approved; their usage is still metered afterwards.
    #[must_use]
    pub fn evaluate(&self, balance: &Balance, actor: &Actor, ceiling_cost: i64) -> GuardDecision {
        if actor.is_admin {
            return GuardDecision::Approved;
        }

        let available = balance.purchased_balance;
        if available <= 0 {
            return GuardDecision::Rejected(RejectReason::InsufficientCredit { balance: available });
        }

        if ceiling_cost > self.max_single_request_cost {
            return GuardDecision::Rejected(RejectReason::RequestTooLarge {
                ceiling_cost,
                max_single_request_cost: self.max_single_request_cost,
            });
        }

        if available < self.security_buffer {
            return GuardDecision::Rejected(RejectReason::LowBalanceBlock {
                balance: available,
                security_buffer: self.security_buffer,
            });
        }

        if let Some(cap) = self.max_cumulative_shortfall {
            if balance.lifetime_shortfall >= cap {
                return GuardDecision::Rejected(RejectReason::ShortfallCapExceeded {
                    lifetime_shortfall: balance.lifetime_shortfall,
                    cap,
                });
            }
        }

        GuardDecision::Approved
    }
}

/// Who is asking, as supplied by the session provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Display name recorded in audit entries.
    pub name: String,
    /// Admins bypass balance checks.
    pub is_admin: bool,
}

impl Actor {
    /// A regular subscriber acting on their own behalf.
    #[must_use]
    pub fn subscriber(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_admin: false,
        }
    }

    /// An administrator.
    #[must_use]
    pub fn admin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_admin: true,
        }
    }
}

/// Outcome of a guard check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "decision", content = "reason")]
pub enum GuardDecision {
    /// The request may proceed.
    Approved,
    /// The request must not proceed.
    Rejected(RejectReason),
}

impl GuardDecision {
    /// Check if the request was approved.
    #[must_use]
    pub const fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

/// Why the guard refused a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "code")]
pub enum RejectReason {
    /// Nothing left to spend.
    InsufficientCredit {
        /// Purchased balance at check time.
        balance: i64,
    },
    /// The request's worst-case cost exceeds the per-request ceiling.
    RequestTooLarge {
        /// Worst-case cost of the request.
        ceiling_cost: i64,
        /// Configured ceiling.
        max_single_request_cost: i64,
    },
    /// Balance is positive but below the security buffer.
    LowBalanceBlock {
        /// Purchased balance at check time.
        balance: i64,
        /// Configured buffer.
        security_buffer: i64,
    },
    /// Cumulative uncollected cost reached the configured cap.
    ShortfallCapExceeded {
        /// Lifetime shortfall at check time.
        lifetime_shortfall: i64,
        /// Configured cap.
        cap: i64,
    },
}

impl RejectReason {
    /// Machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InsufficientCredit { .. } => "insufficient_credit",
            Self::RequestTooLarge { .. } => "request_too_large",
            Self::LowBalanceBlock { .. } => "low_balance_block",
            Self::ShortfallCapExceeded { .. } => "shortfall_cap_exceeded",
        }
    }

    /// Classify the rejection for user-visible handling.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::InsufficientCredit { .. } | Self::LowBalanceBlock { .. } => ErrorClass::Remedy,
            Self::RequestTooLarge { .. } | Self::ShortfallCapExceeded { .. } => ErrorClass::Policy,
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientCredit { balance } => {
                write!(f, "insufficient credit (balance={balance})")
            }
            Self::RequestTooLarge {
                ceiling_cost,
                max_single_request_cost,
            } => write!(
                f,
                "request too large (ceiling={ceiling_cost}, max={max_single_request_cost})"
            ),
            Self::LowBalanceBlock {
                balance,
                security_buffer,
            } => write!(
                f,
                "balance below security buffer (balance={balance}, buffer={security_buffer})"
            ),
            Self::ShortfallCapExceeded {
                lifetime_shortfall,
                cap,
            } => write!(
                f,
                "cumulative shortfall cap reached (shortfall={lifetime_shortfall}, cap={cap})"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Plan, SubscriberId};

    fn balance_with(purchased: i64) -> Balance {
        let mut balance = Balance::new(SubscriberId::generate(), Plan::Enterprise);
        balance.purchased_balance = purchased;
        balance
    }

    #[test]
    fn rejects_empty_balance_as_insufficient() {
        let policy = GuardPolicy::default();
        let user = Actor::subscriber("u");

        for purchased in [0, -1, -500] {
            assert_eq!(
                policy.evaluate(&balance_with(purchased), &user, 10),
                GuardDecision::Rejected(RejectReason::InsufficientCredit { balance: purchased })
            );
        }
    }

    #[test]
    fn low_balance_block_for_every_value_under_buffer() {
        let policy = GuardPolicy::default();
        let user = Actor::subscriber("u");

        for purchased in 1..policy.security_buffer {
            let decision = policy.evaluate(&balance_with(purchased), &user, 10);
            assert!(
                matches!(
                    decision,
                    GuardDecision::Rejected(RejectReason::LowBalanceBlock { .. })
                ),
                "balance {purchased} should be blocked"
            );
        }
        assert!(policy
            .evaluate(&balance_with(policy.security_buffer), &user, 10)
            .is_approved());
    }

    #[test]
    fn request_too_large_regardless_of_balance() {
        let policy = GuardPolicy::default();
        let decision = policy.evaluate(
            &balance_with(1_000_000),
            &Actor::subscriber("u"),
            policy.max_single_request_cost + 1,
        );
        assert_eq!(
            decision,
            GuardDecision::Rejected(RejectReason::RequestTooLarge {
                ceiling_cost: 5001,
                max_single_request_cost: 5000,
            })
        );
    }

    #[test]
    fn admin_is_always_approved() {
        let policy = GuardPolicy::default();
        let admin = Actor::admin("ops");

        for purchased in [-10, 0, 1, 1999, 50_000] {
            assert!(policy.evaluate(&balance_with(purchased), &admin, 1_000_000).is_approved());
        }
    }

    #[test]
    fn shortfall_cap_blocks_when_configured() {
        let policy = GuardPolicy {
            max_cumulative_shortfall: Some(1000),
            ..GuardPolicy::default()
        };
        let mut balance = balance_with(10_000);
        balance.lifetime_shortfall = 1000;

        let decision = policy.evaluate(&balance, &Actor::subscriber("u"), 10);
        assert_eq!(
            decision,
            GuardDecision::Rejected(RejectReason::ShortfallCapExceeded {
                lifetime_shortfall: 1000,
                cap: 1000,
            })
        );
        assert_eq!(
            GuardPolicy::default().evaluate(&balance, &Actor::subscriber("u"), 10),
            GuardDecision::Approved
        );
    }

    #[test]
    fn decision_wire_format() {
        let json = serde_json::to_value(GuardDecision::Rejected(RejectReason::LowBalanceBlock {
            balance: 500,
            security_buffer: 2000,
        }))
        .unwrap();
        assert_eq!(json["decision"], "rejected");
        assert_eq!(json["reason"]["code"], "low_balance_block");
    }
}
