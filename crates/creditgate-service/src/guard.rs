//! Authoritative usage guard.
//!
//! Loads the subscriber's balance straight from the ledger (bounded by the
//! policy timeout) and applies [`GuardPolicy::evaluate`]. Any failure to load
//! the balance in time rejects the request.

use std::sync::Arc;

use serde::Serialize;

use creditgate_core::{
    Actor, Balance, FeatureCatalog, GuardDecision, GuardPolicy, MeterError, PricingConfig, Result,
    SubscriberId,
};
use creditgate_store::{LedgerStore, StoreError};

/// Result of an authoritative guard check.
#[derive(Debug, Clone, Serialize)]
pub struct GuardCheck {
    /// Whether the request may proceed.
    #[serde(flatten)]
    pub decision: GuardDecision,

    /// Purchased balance the decision was based on.
    pub purchased_balance: i64,

    /// Worst-case cost of the request.
    pub ceiling_cost: i64,

    #[serde(skip)]
    pub(crate) balance: Balance,
}

/// Server-side admission check run immediately before a costed call.
pub struct UsageGuard {
    store: Arc<dyn LedgerStore>,
    policy: GuardPolicy,
    pricing: PricingConfig,
    features: FeatureCatalog,
}

impl UsageGuard {
    /// Create a guard over `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn LedgerStore>,
        policy: GuardPolicy,
        pricing: PricingConfig,
        features: FeatureCatalog,
    ) -> Self {
        Self {
            store,
            policy,
            pricing,
            features,
        }
    }

    /// The policy this guard applies.
    #[must_use]
    pub const fn policy(&self) -> &GuardPolicy {
        &self.policy
    }

    /// Check whether `actor` may run `feature` for `subscriber_id`.
    ///
    /// A rejection is a successful check with a `Rejected` decision.
    ///
    /// # Errors
    ///
    /// - `UnknownFeature` / `InvalidAmount` for a bad feature or ceiling.
    /// - `StoreUnavailable` if the balance cannot be loaded within the timeout.
    /// - `AccountNotFound` if the subscriber has no ledger.
    pub async fn check(
        &self,
        subscriber_id: &SubscriberId,
        actor: &Actor,
        feature: &str,
        max_output_units: Option<i64>,
    ) -> Result<GuardCheck> {
        let ceiling_cost = self
            .features
            .ceiling_cost(&self.pricing, feature, max_output_units)?;

        let balance = match tokio::time::timeout(
            self.policy.timeout,
            self.store.get_balance(subscriber_id),
        )
        .await
        {
            Ok(Ok(balance)) => balance,
            Ok(Err(StoreError::NotFound { subscriber_id })) => {
                return Err(MeterError::AccountNotFound { subscriber_id })
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    subscriber_id = %subscriber_id,
                    error = %e,
                    "Balance load failed, rejecting request"
                );
                return Err(MeterError::StoreUnavailable(e.to_string()));
            }
            Err(_) => {
                tracing::warn!(
                    subscriber_id = %subscriber_id,
                    timeout_ms = %self.policy.timeout.as_millis(),
                    "Balance load timed out, rejecting request"
                );
                return Err(MeterError::StoreUnavailable(
                    "balance load timed out".to_string(),
                ));
            }
        };

        let decision = self.policy.evaluate(&balance, actor, ceiling_cost);

        tracing::debug!(
            subscriber_id = %subscriber_id,
            actor = %actor.name,
            admin = actor.is_admin,
            feature = %feature,
            balance = balance.purchased_balance,
            ceiling_cost = ceiling_cost,
            approved = decision.is_approved(),
            "Guard evaluated"
        );

        Ok(GuardCheck {
            decision,
            purchased_balance: balance.purchased_balance,
            ceiling_cost,
            balance,
        })
    }
}
