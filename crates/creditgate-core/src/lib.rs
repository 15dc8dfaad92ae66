//! Core types and utilities for creditgate.
//!
//! This crate provides the foundational types shared by the ledger store, the
//! metering service and the client SDK:
//!
//! - **Identifiers**: `SubscriberId`, `EventId`
//! - **Balances**: `Balance`, `Plan`, `CreditTarget`
//! - **Audit**: `UsageEvent`, `AdminAdjustmentEvent`, `ShortfallEvent`, `AuditEntry`
//! - **Policy**: `GuardPolicy`, `GuardDecision`, `RejectReason`, `Actor`
//! - **Pricing**: `PricingConfig`, `FeatureCatalog`
//! - **Scheduling**: `RetryPolicy`, `Clock`
//!
//! # Credits
//!
//! All amounts are whole credits stored as `i64`. Only output units of a
//! metered operation are billable; input units are recorded for reference.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod audit;
pub mod balance;
pub mod clock;
pub mod error;
pub mod ids;
pub mod policy;
pub mod pricing;
pub mod retry;
pub mod usage;

pub use audit::{
    AdjustmentKind, AdminAdjustmentEvent, AuditEntry, BalanceChange, ChangeKind, ShortfallEvent,
    BILLING_CYCLE_ACTOR,
};
pub use balance::{
    Balance, CreditTarget, Plan, ENTERPRISE_PLAN_ALLOWANCE, PRO_PLAN_ALLOWANCE,
    STANDARD_PLAN_ALLOWANCE,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorClass, MeterError, Result};
pub use ids::{EventId, IdError, SubscriberId};
pub use policy::{
    Actor, GuardDecision, GuardPolicy, RejectReason, DEFAULT_GUARD_TIMEOUT,
    DEFAULT_MAX_SINGLE_REQUEST_COST, DEFAULT_SECURITY_BUFFER,
};
pub use pricing::{FeatureCatalog, FeatureConfig, ModelPricing, PricingConfig};
pub use retry::{JitterFn, RetryPolicy};
pub use usage::{ReportedUsage, UsageEvent, UsageOutcome};
