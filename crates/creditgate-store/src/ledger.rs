//! Mutation rules shared by every backend.
//!
//! Each function validates and applies one mutation to a balance that the
//! caller has already locked. On error the balance is left untouched.

use chrono::Utc;

use creditgate_core::{Balance, CreditTarget, UsageEvent};

use crate::error::{Result, StoreError};

/// Apply a usage deduction.
///
/// # Errors
///
/// Fails closed with `InsufficientCredits` when the cost exceeds the
/// purchased balance, and with `InvalidAmount` for negative costs.
pub fn apply_deduct(balance: &mut Balance, event: &UsageEvent) -> Result<()> {
    let amount = event.realized_cost;
    if amount < 0 {
        return Err(StoreError::InvalidAmount(format!(
            "deduction must not be negative: {amount}"
        )));
    }

    if !balance.can_cover(amount) {
        return Err(StoreError::InsufficientCredits {
            balance: balance.purchased_balance,
            required: amount,
        });
    }

    let lifetime_used = balance
        .lifetime_used
        .checked_add(amount)
        .ok_or_else(|| StoreError::InvalidAmount("lifetime usage overflow".into()))?;

    balance.purchased_balance -= amount;
    balance.lifetime_used = lifetime_used;
    balance.updated_at = Utc::now();
    Ok(())
}

/// Apply an administrative credit.
///
/// # Errors
///
/// Returns `InvalidAmount` for non-positive amounts or overflow.
pub fn apply_credit(balance: &mut Balance, amount: i64, target: CreditTarget) -> Result<()> {
    if amount <= 0 {
        return Err(StoreError::InvalidAmount(format!(
            "credit must be positive: {amount}"
        )));
    }

    let pool = match target {
        CreditTarget::MonthlyAllowance => &mut balance.monthly_allowance,
        CreditTarget::PurchasedBalance => &mut balance.purchased_balance,
    };
    *pool = pool
        .checked_add(amount)
        .ok_or_else(|| StoreError::InvalidAmount(format!("{} overflow", target.as_str())))?;

    balance.updated_at = Utc::now();
    Ok(())
}

/// Reset the monthly allowance to the plan default.
pub fn apply_monthly_reset(balance: &mut Balance) {
    balance.monthly_allowance = balance.plan.monthly_allowance();
    balance.updated_at = Utc::now();
}

/// Account for an uncollected cost.
///
/// Deductions are all-or-nothing, so the whole realized cost is uncollected.
pub fn apply_shortfall(balance: &mut Balance, event: &UsageEvent) {
    balance.lifetime_shortfall = balance
        .lifetime_shortfall
        .saturating_add(event.realized_cost.max(0));
    balance.updated_at = Utc::now();
}

#[cfg(test)]
mod tests {
    use super::*;
    use creditgate_core::{Plan, ReportedUsage, SubscriberId};

    fn funded(purchased: i64) -> Balance {
        let mut balance = Balance::new(SubscriberId::generate(), Plan::Standard);
        balance.purchased_balance = purchased;
        balance
    }

    fn usage(balance: &Balance, cost: i64) -> UsageEvent {
        UsageEvent::new(balance.subscriber_id, "chat", cost, ReportedUsage::default())
    }

    #[test]
    fn deduct_moves_cost_into_lifetime_used() {
        let mut balance = funded(1000);
        let event = usage(&balance, 300);

        apply_deduct(&mut balance, &event).unwrap();
        assert_eq!(balance.purchased_balance, 700);
        assert_eq!(balance.lifetime_used, 300);
    }

    #[test]
    fn deduct_can_reach_exactly_zero() {
        let mut balance = funded(300);
        let event = usage(&balance, 300);

        apply_deduct(&mut balance, &event).unwrap();
        assert_eq!(balance.purchased_balance, 0);
    }

    #[test]
    fn deduct_over_balance_changes_nothing() {
        let mut balance = funded(299);
        let before = balance.clone();
        let event = usage(&balance, 300);

        let err = apply_deduct(&mut balance, &event).unwrap_err();
        assert!(matches!(
            err,
            StoreError::InsufficientCredits {
                balance: 299,
                required: 300
            }
        ));
        assert_eq!(balance, before);
    }

    #[test]
    fn negative_deduct_is_rejected() {
        let mut balance = funded(100);
        let event = usage(&balance, -5);
        assert!(matches!(
            apply_deduct(&mut balance, &event),
            Err(StoreError::InvalidAmount(_))
        ));
        assert_eq!(balance.purchased_balance, 100);
    }

    #[test]
    fn credit_targets_one_pool() {
        let mut balance = funded(500);

        apply_credit(&mut balance, 5000, CreditTarget::PurchasedBalance).unwrap();
        assert_eq!(balance.purchased_balance, 5500);
        assert_eq!(balance.monthly_allowance, 2500);

        apply_credit(&mut balance, 100, CreditTarget::MonthlyAllowance).unwrap();
        assert_eq!(balance.monthly_allowance, 2600);
        assert_eq!(balance.purchased_balance, 5500);
    }

    #[test]
    fn non_positive_credit_is_rejected() {
        let mut balance = funded(500);
        assert!(apply_credit(&mut balance, 0, CreditTarget::PurchasedBalance).is_err());
        assert!(apply_credit(&mut balance, -1, CreditTarget::PurchasedBalance).is_err());
        assert_eq!(balance.purchased_balance, 500);
    }

    #[test]
    fn reset_restores_plan_allowance() {
        let mut balance = funded(0);
        balance.monthly_allowance = 3;
        apply_monthly_reset(&mut balance);
        assert_eq!(balance.monthly_allowance, 2500);
    }

    #[test]
    fn shortfall_accumulates_whole_cost() {
        let mut balance = funded(100);
        let event = usage(&balance, 300);

        apply_shortfall(&mut balance, &event);
        assert_eq!(balance.lifetime_shortfall, 300);
        assert_eq!(balance.purchased_balance, 100);
    }
}
