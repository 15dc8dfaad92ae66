//! Pricing and feature configuration for creditgate.
//!
//! Only output units are billable. The guard prices a request's worst case
//! from its output-unit ceiling before the call; reconciliation prices the
//! output units the call actually reported.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{MeterError, Result};
use crate::ReportedUsage;

/// Per-model pricing in credits per million units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Credits per million input units (informational only).
    pub input_credits_per_million: i64,
    /// Credits per million output units.
    pub output_credits_per_million: i64,
}

/// Pricing for all metered models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Pricing by model name.
    pub models: HashMap<String, ModelPricing>,

    /// Pricing for models not listed above.
    pub default_pricing: ModelPricing,
}

impl Default for PricingConfig {
    fn default() -> Self {
        let mut models = HashMap::new();

        models.insert(
            "claude-3-5-sonnet".to_string(),
            ModelPricing {
                input_credits_per_million: 300,   // $3.00 per 1M input units
                output_credits_per_million: 1500, // $15.00 per 1M output units
            },
        );
        models.insert(
            "claude-3-haiku".to_string(),
            ModelPricing {
                input_credits_per_million: 25,
                output_credits_per_million: 125,
            },
        );
        models.insert(
            "claude-3-opus".to_string(),
            ModelPricing {
                input_credits_per_million: 1500,
                output_credits_per_million: 7500,
            },
        );
        models.insert(
            "gpt-4o".to_string(),
            ModelPricing {
                input_credits_per_million: 250,
                output_credits_per_million: 1000,
            },
        );

        Self {
            models,
            default_pricing: ModelPricing {
                input_credits_per_million: 100,
                output_credits_per_million: 300,
            },
        }
    }
}

impl PricingConfig {
    /// Pricing for a model, falling back to the default.
    #[must_use]
    pub fn for_model(&self, model: &str) -> ModelPricing {
        self.models
            .get(model)
            .copied()
            .unwrap_or(self.default_pricing)
    }

    /// Cost in credits of `output_units` for `model`.
    ///
    /// Rounds up, so any non-zero output costs at least one credit.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::Metering` if the unit count is negative or the
    /// cost does not fit in an `i64`.
    pub fn output_cost(&self, model: &str, output_units: i64) -> Result<i64> {
        if output_units < 0 {
            return Err(MeterError::Metering(format!(
                "negative output units reported: {output_units}"
            )));
        }

        let rate = i128::from(self.for_model(model).output_credits_per_million);
        let raw = i128::from(output_units) * rate;
        let cost = (raw + 999_999) / 1_000_000;

        i64::try_from(cost)
            .map_err(|_| MeterError::Metering(format!("cost overflow for {output_units} units")))
    }

    /// Realized cost of a completed operation.
    ///
    /// Input units are validated but never billed.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::Metering` if either unit count is negative.
    pub fn realized_cost(&self, model: &str, usage: &ReportedUsage) -> Result<i64> {
        if usage.input_units < 0 {
            return Err(MeterError::Metering(format!(
                "negative input units reported: {}",
                usage.input_units
            )));
        }
        self.output_cost(model, usage.output_units)
    }
}

/// Configuration for one metered feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Model the feature runs on.
    pub model: String,

    /// Output-unit ceiling used when the request does not set one.
    pub default_max_output_units: i64,
}

/// The set of features that may be metered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureCatalog {
    features: HashMap<String, FeatureConfig>,
}

impl Default for FeatureCatalog {
    fn default() -> Self {
        Self::new()
            .with_feature("chat", "claude-3-5-sonnet", 4096)
            .with_feature("summarize", "claude-3-haiku", 1024)
            .with_feature("quiz", "claude-3-5-sonnet", 8192)
    }
}

impl FeatureCatalog {
    /// An empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self {
            features: HashMap::new(),
        }
    }

    /// Add or replace a feature.
    #[must_use]
    pub fn with_feature(
        mut self,
        tag: impl Into<String>,
        model: impl Into<String>,
        default_max_output_units: i64,
    ) -> Self {
        self.features.insert(
            tag.into(),
            FeatureConfig {
                model: model.into(),
                default_max_output_units,
            },
        );
        self
    }

    /// Look up a feature.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::UnknownFeature` if the tag is not configured.
    pub fn get(&self, tag: &str) -> Result<&FeatureConfig> {
        self.features
            .get(tag)
            .ok_or_else(|| MeterError::UnknownFeature(tag.to_string()))
    }

    /// Worst-case cost of a request for `tag`.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown features or invalid ceilings.
    pub fn ceiling_cost(
        &self,
        pricing: &PricingConfig,
        tag: &str,
        max_output_units: Option<i64>,
    ) -> Result<i64> {
        let feature = self.get(tag)?;
        let units = max_output_units.unwrap_or(feature.default_max_output_units);
        pricing
            .output_cost(&feature.model, units)
            .map_err(|_| MeterError::InvalidAmount(format!("invalid output ceiling: {units}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_cost_rounds_up() {
        let pricing = PricingConfig::default();
        assert_eq!(pricing.output_cost("claude-3-5-sonnet", 0).unwrap(), 0);
        assert_eq!(pricing.output_cost("claude-3-5-sonnet", 1).unwrap(), 1);
        assert_eq!(pricing.output_cost("claude-3-5-sonnet", 1_000_000).unwrap(), 1500);
    }

    #[test]
    fn unknown_model_uses_default_pricing() {
        let pricing = PricingConfig::default();
        assert_eq!(pricing.output_cost("mystery", 1_000_000).unwrap(), 300);
    }

    #[test]
    fn negative_units_are_metering_errors() {
        let pricing = PricingConfig::default();
        assert!(matches!(
            pricing.output_cost("gpt-4o", -1),
            Err(MeterError::Metering(_))
        ));
        assert!(matches!(
            pricing.realized_cost(
                "gpt-4o",
                &ReportedUsage {
                    input_units: -5,
                    output_units: 10
                }
            ),
            Err(MeterError::Metering(_))
        ));
    }

    #[test]
    fn input_units_are_not_billed() {
        let pricing = PricingConfig::default();
        let usage = ReportedUsage {
            input_units: 10_000_000,
            output_units: 0,
        };
        assert_eq!(pricing.realized_cost("claude-3-opus", &usage).unwrap(), 0);
    }

    #[test]
    fn ceiling_cost_uses_feature_default() {
        let catalog = FeatureCatalog::new().with_feature("chat", "flat", 500);
        let mut pricing = PricingConfig::default();
        pricing.models.insert(
            "flat".into(),
            ModelPricing {
                input_credits_per_million: 0,
                output_credits_per_million: 1_000_000,
            },
        );

        assert_eq!(catalog.ceiling_cost(&pricing, "chat", None).unwrap(), 500);
        assert_eq!(catalog.ceiling_cost(&pricing, "chat", Some(20)).unwrap(), 20);
        assert!(matches!(
            catalog.ceiling_cost(&pricing, "missing", None),
            Err(MeterError::UnknownFeature(_))
        ));
    }
}
