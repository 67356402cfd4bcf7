//! Model pricing table, USD per 1000 tokens.
//!
//! Single source of truth for token costs, exposed to the dashboard via
//! `GET /v1/stats/pricing`. Unknown models cost zero and are flagged so the
//! caller can tell an estimate from a real price.

use serde::Serialize;

/// (model, input price per 1k tokens, output price per 1k tokens)
pub const MODEL_PRICING: &[(&str, f64, f64)] = &[
    ("gpt-4o", 0.0025, 0.010),
    ("gpt-4o-mini", 0.00015, 0.0006),
    ("gpt-4-turbo", 0.010, 0.030),
    ("gpt-4", 0.030, 0.060),
    ("gpt-3.5-turbo", 0.0005, 0.0015),
    ("o1", 0.015, 0.060),
    ("o1-mini", 0.003, 0.012),
    ("o3-mini", 0.0011, 0.0044),
    ("claude-opus-4-6", 0.015, 0.075),
    ("claude-sonnet-4-5-20250929", 0.003, 0.015),
    ("claude-haiku-4-5-20251001", 0.0008, 0.004),
];

#[derive(Debug, Clone, Serialize)]
pub struct CostBreakdown {
    pub cost_usd: f64,
    /// True when the model has a known price; false means cost 0 estimate
    pub priced: bool,
}

pub fn pricing_for(model: &str) -> Option<(f64, f64)> {
    MODEL_PRICING
        .iter()
        .find(|(name, _, _)| *name == model)
        .map(|(_, input, output)| (*input, *output))
}

/// Cost of one usage record. Unknown models yield zero with `priced: false`.
pub fn cost(model: &str, prompt_tokens: i64, completion_tokens: i64) -> CostBreakdown {
    match pricing_for(model) {
        Some((input, output)) => CostBreakdown {
            cost_usd: prompt_tokens as f64 / 1000.0 * input
                + completion_tokens as f64 / 1000.0 * output,
            priced: true,
        },
        None => CostBreakdown {
            cost_usd: 0.0,
            priced: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_model_cost() {
        let breakdown = cost("gpt-4o-mini", 1000, 1000);
        assert!(breakdown.priced);
        assert!((breakdown.cost_usd - (0.00015 + 0.0006)).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_model_flagged() {
        let breakdown = cost("some-local-model", 5000, 5000);
        assert!(!breakdown.priced);
        assert_eq!(breakdown.cost_usd, 0.0);
    }

    #[test]
    fn test_zero_usage_costs_nothing() {
        let breakdown = cost("gpt-4o", 0, 0);
        assert!(breakdown.priced);
        assert_eq!(breakdown.cost_usd, 0.0);
    }
}
