//! Metered execution and reconciliation.
//!
//! A metered call runs in three phases: admission (rate limit, then the
//! authoritative guard), the costed operation itself with no ledger lock
//! held, and reconciliation. Reconciliation deducts the realized cost; if the
//! balance drained in the meantime the cost is recorded as a shortfall and
//! the result is still delivered.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use creditgate_core::{
    Actor, Balance, Clock, CreditTarget, EventId, FeatureCatalog, GuardDecision, GuardPolicy,
    MeterError, PricingConfig, Result, SubscriberId, UsageEvent, BILLING_CYCLE_ACTOR,
};
use creditgate_store::{LedgerStore, StoreError};

use crate::guard::{GuardCheck, UsageGuard};
use crate::limiter::RateLimiter;
use crate::operation::{CostedOperation, OperationRequest};

/// Settings for [`MeteringService`].
#[derive(Debug, Clone)]
pub struct MeteringConfig {
    /// Guard thresholds.
    pub policy: GuardPolicy,
    /// Model prices.
    pub pricing: PricingConfig,
    /// Metered features.
    pub features: FeatureCatalog,
    /// Metered calls allowed per subscriber per window.
    pub rate_limit_max: u32,
    /// Rate-limit window length.
    pub rate_limit_window: Duration,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            policy: GuardPolicy::default(),
            pricing: PricingConfig::default(),
            features: FeatureCatalog::default(),
            rate_limit_max: 60,
            rate_limit_window: Duration::from_secs(60),
        }
    }
}

/// A metered call as requested by a caller.
#[derive(Debug, Clone, Deserialize)]
pub struct MeteredRequest {
    /// Feature tag to bill under.
    pub feature: String,
    /// Output-unit ceiling. Defaults to the feature's ceiling.
    #[serde(default)]
    pub max_output_units: Option<i64>,
    /// Payload for the costed operation.
    #[serde(default)]
    pub input: serde_json::Value,
}

/// Result of a metered call.
#[derive(Debug, Clone, Serialize)]
pub struct MeteredResult {
    /// Output of the costed operation.
    pub output: serde_json::Value,
    /// Usage event recorded for the call.
    pub event_id: EventId,
    /// Realized cost in credits.
    pub realized_cost: i64,
    /// Purchased balance after reconciliation.
    pub balance_after: i64,
    /// True if the cost could not be collected.
    pub shortfall: bool,
}

/// Runs metered operations against the ledger.
pub struct MeteringService {
    store: Arc<dyn LedgerStore>,
    guard: UsageGuard,
    limiter: RateLimiter,
    operation: Arc<dyn CostedOperation>,
    pricing: PricingConfig,
    features: FeatureCatalog,
    rate_limit_max: u32,
    rate_limit_window: Duration,
}

impl MeteringService {
    /// Create a metering service.
    #[must_use]
    pub fn new(
        store: Arc<dyn LedgerStore>,
        operation: Arc<dyn CostedOperation>,
        config: MeteringConfig,
    ) -> Self {
        Self::with_limiter(store, operation, config, RateLimiter::new())
    }

    /// Create a metering service whose rate limiter reads `clock`.
    #[must_use]
    pub fn with_clock(
        store: Arc<dyn LedgerStore>,
        operation: Arc<dyn CostedOperation>,
        config: MeteringConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_limiter(store, operation, config, RateLimiter::with_clock(clock))
    }

    fn with_limiter(
        store: Arc<dyn LedgerStore>,
        operation: Arc<dyn CostedOperation>,
        config: MeteringConfig,
        limiter: RateLimiter,
    ) -> Self {
        let guard = UsageGuard::new(
            store.clone(),
            config.policy,
            config.pricing.clone(),
            config.features.clone(),
        );
        Self {
            store,
            guard,
            limiter,
            operation,
            pricing: config.pricing,
            features: config.features,
            rate_limit_max: config.rate_limit_max,
            rate_limit_window: config.rate_limit_window,
        }
    }

    /// Run the authoritative guard without performing anything.
    ///
    /// # Errors
    ///
    /// See [`UsageGuard::check`].
    pub async fn check_guard(
        &self,
        subscriber_id: &SubscriberId,
        actor: &Actor,
        feature: &str,
        max_output_units: Option<i64>,
    ) -> Result<GuardCheck> {
        self.guard
            .check(subscriber_id, actor, feature, max_output_units)
            .await
    }

    /// Admit, perform and reconcile one costed operation.
    ///
    /// # Errors
    ///
    /// - `RateLimited` or `Rejected` before the operation runs.
    /// - `Upstream` if the operation produced nothing. Nothing is billed.
    /// - `Metering` if the operation's usage cannot be priced. Nothing is billed.
    ///
    /// A failed deduction is not an error: the result carries `shortfall: true`.
    pub async fn perform_metered_operation(
        &self,
        subscriber_id: &SubscriberId,
        actor: &Actor,
        request: MeteredRequest,
    ) -> Result<MeteredResult> {
        self.limiter.check(
            &subscriber_id.to_string(),
            self.rate_limit_max,
            self.rate_limit_window,
        )?;

        let check = self
            .guard
            .check(subscriber_id, actor, &request.feature, request.max_output_units)
            .await?;
        if let GuardDecision::Rejected(reason) = check.decision {
            tracing::info!(
                subscriber_id = %subscriber_id,
                feature = %request.feature,
                reason = %reason,
                "Metered call rejected"
            );
            return Err(MeterError::Rejected(reason));
        }

        let feature = self.features.get(&request.feature)?;
        let model = feature.model.clone();
        let max_output_units = request
            .max_output_units
            .unwrap_or(feature.default_max_output_units);

        let outcome = self
            .operation
            .invoke(&OperationRequest {
                feature: request.feature.clone(),
                model: model.clone(),
                max_output_units,
                input: request.input,
            })
            .await?;

        let realized_cost = outcome
            .usage
            .ok_or_else(|| MeterError::Metering("operation reported no usage".to_string()))
            .and_then(|usage| {
                self.pricing
                    .realized_cost(&model, &usage)
                    .map(|cost| (usage, cost))
            });
        let (usage, realized_cost) = match realized_cost {
            Ok(priced) => priced,
            Err(e) => {
                tracing::error!(
                    subscriber_id = %subscriber_id,
                    feature = %request.feature,
                    error = %e,
                    "Metering failed, nothing billed"
                );
                return Err(e);
            }
        };

        let event = UsageEvent::new(*subscriber_id, &request.feature, realized_cost, usage);
        let event_id = event.id;

        let (balance_after, shortfall) = match self.store.deduct(&event).await {
            Ok(balance) => {
                tracing::info!(
                    subscriber_id = %subscriber_id,
                    feature = %request.feature,
                    cost = %realized_cost,
                    balance = %balance.purchased_balance,
                    "Usage charged"
                );
                (balance.purchased_balance, false)
            }
            Err(e) => {
                let available = match e {
                    StoreError::InsufficientCredits { balance, .. } => balance,
                    _ => check.balance.purchased_balance,
                };
                self.reconcile_shortfall(event, available, &e).await;
                (available, true)
            }
        };

        Ok(MeteredResult {
            output: outcome.output,
            event_id,
            realized_cost,
            balance_after,
            shortfall,
        })
    }

    /// Record an uncollected cost. Failures here are logged, never surfaced:
    /// the result has already been produced.
    async fn reconcile_shortfall(&self, event: UsageEvent, available: i64, cause: &StoreError) {
        let shortfall = MeterError::ReconciliationShortfall {
            requested: event.realized_cost,
            available,
        };
        tracing::warn!(
            subscriber_id = %event.subscriber_id,
            feature = %event.feature_tag,
            event_id = %event.id,
            cause = %cause,
            "{shortfall}"
        );

        if let Err(e) = self
            .store
            .record_shortfall(&event.into_shortfall(), available)
            .await
        {
            tracing::error!(error = %e, "Failed to record shortfall");
        }
    }

    /// Credit a subscriber. Admin only.
    ///
    /// # Errors
    ///
    /// - `Forbidden` for non-admin actors.
    /// - `InvalidAmount` for non-positive amounts.
    /// - `AccountNotFound` if the subscriber has no ledger.
    pub async fn adjust_balance(
        &self,
        subscriber_id: &SubscriberId,
        target: CreditTarget,
        amount: i64,
        reason: &str,
        actor: &Actor,
    ) -> Result<Balance> {
        if !actor.is_admin {
            return Err(MeterError::Forbidden(
                "balance adjustments require an admin".to_string(),
            ));
        }

        let balance = self
            .store
            .credit(subscriber_id, amount, target, reason, &actor.name)
            .await?;

        tracing::info!(
            subscriber_id = %subscriber_id,
            actor = %actor.name,
            target = %target.as_str(),
            amount = %amount,
            reason = %reason,
            "Balance adjusted"
        );
        Ok(balance)
    }

    /// Reset a subscriber's monthly allowance. Admin only; the audit entry is
    /// attributed to the billing cycle.
    ///
    /// # Errors
    ///
    /// - `Forbidden` for non-admin actors.
    /// - `AccountNotFound` if the subscriber has no ledger.
    pub async fn reset_monthly(&self, subscriber_id: &SubscriberId, actor: &Actor) -> Result<Balance> {
        if !actor.is_admin {
            return Err(MeterError::Forbidden(
                "monthly resets require an admin".to_string(),
            ));
        }

        let balance = self
            .store
            .reset_monthly(subscriber_id, BILLING_CYCLE_ACTOR)
            .await?;

        tracing::info!(
            subscriber_id = %subscriber_id,
            triggered_by = %actor.name,
            allowance = %balance.monthly_allowance,
            "Monthly allowance reset"
        );
        Ok(balance)
    }
}
