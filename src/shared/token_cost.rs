//! Token-usage to cost conversion for evaluator and summarizer calls.
//!
//! Prices are $ per 1M tokens (input, output), following the published
//! Gemini API pricing. Unknown model names fall back to a conservative
//! default price instead of failing.

use crate::domain::verdict::TokenUsage;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
}

/// Immutable per-model price table, injected into the use cases at
/// construction time.
#[derive(Debug, Clone)]
pub struct PriceTable {
    prices: HashMap<String, ModelPrice>,
    default_price: ModelPrice,
}

impl Default for PriceTable {
    fn default() -> Self {
        let mut prices = HashMap::new();
        let mut insert = |model: &str, input: f64, output: f64| {
            prices.insert(model.to_string(), ModelPrice { input, output });
        };
        insert("gemini-1.5-flash", 0.075, 0.3);
        insert("gemini-1.5-flash-8b", 0.0375, 0.15);
        insert("gemini-2.0-flash", 0.1, 0.4);
        insert("gemini-2.5-pro", 1.25, 10.0);
        insert("gemini-2.5-flash", 0.3, 2.5);
        insert("gemini-3-pro-preview", 2.0, 12.0);
        insert("gemini-3-flash-preview", 0.5, 2.0);

        Self {
            prices,
            default_price: ModelPrice {
                input: 1.25,
                output: 5.0,
            },
        }
    }
}

impl PriceTable {
    pub fn price_for(&self, model: &str) -> ModelPrice {
        self.prices.get(model).copied().unwrap_or(self.default_price)
    }

    /// Compute the usage record for one call, rounded to 6 decimal places.
    pub fn compute_token_cost(
        &self,
        prompt_tokens: i64,
        completion_tokens: i64,
        model: &str,
    ) -> TokenUsage {
        let price = self.price_for(model);
        let cost_usd = (prompt_tokens as f64 / 1_000_000.0) * price.input
            + (completion_tokens as f64 / 1_000_000.0) * price.output;
        TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            cost_usd: round_usd(cost_usd),
        }
    }
}

pub fn round_usd(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_model_price() {
        let table = PriceTable::default();
        let usage = table.compute_token_cost(1_000_000, 1_000_000, "gemini-2.5-flash");
        assert_eq!(usage.prompt_tokens, 1_000_000);
        assert_eq!(usage.completion_tokens, 1_000_000);
        assert_eq!(usage.total_tokens, 2_000_000);
        assert_eq!(usage.cost_usd, 0.3 + 2.5);
    }

    #[test]
    fn test_unknown_model_uses_default_price() {
        let table = PriceTable::default();
        let usage = table.compute_token_cost(2_000_000, 1_000_000, "some-future-model");
        assert_eq!(usage.cost_usd, 2.0 * 1.25 + 5.0);
    }

    #[test]
    fn test_cost_is_linear_per_term() {
        let table = PriceTable::default();
        let base = table.compute_token_cost(400_000, 200_000, "gemini-2.0-flash");
        let doubled_prompt = table.compute_token_cost(800_000, 200_000, "gemini-2.0-flash");
        let doubled_completion = table.compute_token_cost(400_000, 400_000, "gemini-2.0-flash");

        let prompt_term = 0.4 * 0.1;
        let completion_term = 0.2 * 0.4;
        assert_eq!(base.cost_usd, round_usd(prompt_term + completion_term));
        assert_eq!(
            doubled_prompt.cost_usd,
            round_usd(2.0 * prompt_term + completion_term)
        );
        assert_eq!(
            doubled_completion.cost_usd,
            round_usd(prompt_term + 2.0 * completion_term)
        );
    }

    #[test]
    fn test_rounding_to_six_decimals() {
        let table = PriceTable::default();
        // 1.25 + 10.0 over 3 tokens produces a repeating fraction
        let usage = table.compute_token_cost(3, 3, "gemini-2.5-pro");
        assert_eq!(usage.cost_usd, round_usd(usage.cost_usd));
        assert_eq!(usage.cost_usd, 0.000034);
    }

    #[test]
    fn test_zero_tokens_zero_cost() {
        let table = PriceTable::default();
        let usage = table.compute_token_cost(0, 0, "gemini-2.5-pro");
        assert_eq!(usage.cost_usd, 0.0);
        assert_eq!(usage.total_tokens, 0);
    }
}
