//! Usage event types for creditgate.
//!
//! A usage event is written for every metered operation that produced a
//! result, whether or not its realized cost could be collected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EventId, SubscriberId};

/// Units reported by the costed operation once it completes.
///
/// Values are signed so that a misbehaving upstream reporting negative
/// counts can be detected and rejected rather than silently wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReportedUsage {
    /// Prompt units consumed (informational, never billed).
    pub input_units: i64,
    /// Completion units produced (billable).
    pub output_units: i64,
}

/// Whether the realized cost of a usage event was collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageOutcome {
    /// The full cost was deducted from the purchased balance.
    Charged,
    /// The deduction failed; the cost was absorbed as a shortfall.
    Shortfall,
}

/// An immutable record of one metered operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    /// Unique, time-ordered event ID. Also the idempotency key for `Deduct`.
    pub id: EventId,

    /// The subscriber being charged.
    pub subscriber_id: SubscriberId,

    /// Feature that invoked the operation (e.g. `"chat"`, `"summarize"`).
    pub feature_tag: String,

    /// Realized cost in credits.
    pub realized_cost: i64,

    /// Input units reported by the operation.
    pub input_units: i64,

    /// Output units reported by the operation.
    pub output_units: i64,

    /// Whether the cost was collected.
    pub outcome: UsageOutcome,

    /// When the event was recorded.
    pub created_at: DateTime<Utc>,
}

impl UsageEvent {
    /// Create a new usage event that expects to be charged.
    #[must_use]
    pub fn new(
        subscriber_id: SubscriberId,
        feature_tag: impl Into<String>,
        realized_cost: i64,
        usage: ReportedUsage,
    ) -> Self {
        Self {
            id: EventId::generate(),
            subscriber_id,
            feature_tag: feature_tag.into(),
            realized_cost,
            input_units: usage.input_units,
            output_units: usage.output_units,
            outcome: UsageOutcome::Charged,
            created_at: Utc::now(),
        }
    }

    /// Mark this event as an uncollected shortfall.
    #[must_use]
    pub fn into_shortfall(mut self) -> Self {
        self.outcome = UsageOutcome::Shortfall;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_is_charged_and_keeps_units() {
        let usage = ReportedUsage {
            input_units: 1200,
            output_units: 400,
        };
        let event = UsageEvent::new(SubscriberId::generate(), "chat", 12, usage);

        assert_eq!(event.outcome, UsageOutcome::Charged);
        assert_eq!(event.feature_tag, "chat");
        assert_eq!(event.input_units, 1200);
        assert_eq!(event.output_units, 400);
    }

    #[test]
    fn into_shortfall_keeps_identity() {
        let event = UsageEvent::new(SubscriberId::generate(), "chat", 300, ReportedUsage::default());
        let id = event.id;
        let shortfall = event.into_shortfall();

        assert_eq!(shortfall.id, id);
        assert_eq!(shortfall.outcome, UsageOutcome::Shortfall);
        assert_eq!(shortfall.realized_cost, 300);
    }
}
