//! Per-model pricing table
//!
//! Cost is expressed per thousand tokens, split into input and output
//! rates. Lookup is a case-insensitive substring match against the model
//! (or provider) name, with the most specific (longest) pattern winning
//! and a hard default for anything unrecognized.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default rates applied when no pattern matches, per 1K tokens.
pub const DEFAULT_INPUT_PRICE: f64 = 0.001;
pub const DEFAULT_OUTPUT_PRICE: f64 = 0.002;

/// Pricing for a single model family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelPricing {
    pub model: String,
    pub input_price_per_1k: f64,
    pub output_price_per_1k: f64,
}

impl ModelPricing {
    pub fn new(model: impl Into<String>, input_price_per_1k: f64, output_price_per_1k: f64) -> Self {
        Self {
            model: model.into(),
            input_price_per_1k,
            output_price_per_1k,
        }
    }

    /// Pure cost function: `in * price_in / 1000 + out * price_out / 1000`.
    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        input_tokens as f64 * self.input_price_per_1k / 1000.0
            + output_tokens as f64 * self.output_price_per_1k / 1000.0
    }
}

/// Static mapping from model-name substrings to pricing.
#[derive(Debug, Clone)]
pub struct PricingTable {
    entries: Vec<(String, ModelPricing)>,
    default: ModelPricing,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_default_models()
    }
}

impl PricingTable {
    /// Empty table; every lookup resolves to the default rates.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            default: ModelPricing::new("default", DEFAULT_INPUT_PRICE, DEFAULT_OUTPUT_PRICE),
        }
    }

    /// Table seeded with the usual public price points.
    pub fn with_default_models() -> Self {
        let mut table = Self::empty();
        for (pattern, input, output) in [
            ("gpt-4o-mini", 0.00015, 0.0006),
            ("gpt-4o", 0.0025, 0.01),
            ("gpt-4-turbo", 0.01, 0.03),
            ("gpt-4", 0.03, 0.06),
            ("gpt-3.5", 0.0005, 0.0015),
            ("o1-mini", 0.003, 0.012),
            ("o1", 0.015, 0.06),
            ("claude-3-opus", 0.015, 0.075),
            ("claude-3-5-sonnet", 0.003, 0.015),
            ("claude-3-sonnet", 0.003, 0.015),
            ("claude-3-haiku", 0.00025, 0.00125),
            ("gemini-1.5-pro", 0.00125, 0.005),
            ("gemini-1.5-flash", 0.000075, 0.0003),
            ("gemini", 0.0005, 0.0015),
            ("mixtral", 0.0006, 0.0006),
            ("mistral-large", 0.002, 0.006),
            ("mistral", 0.00025, 0.00025),
            ("groq", 0.00005, 0.00008),
            // Locally hosted models bill nothing.
            ("ollama", 0.0, 0.0),
            ("llama", 0.0, 0.0),
            ("local", 0.0, 0.0),
        ] {
            table.insert(pattern, ModelPricing::new(pattern, input, output));
        }
        table
    }

    /// Register or replace the pricing for a name pattern.
    pub fn insert(&mut self, pattern: impl Into<String>, pricing: ModelPricing) {
        let pattern = pattern.into().to_lowercase();
        if let Some(entry) = self.entries.iter_mut().find(|(p, _)| *p == pattern) {
            entry.1 = pricing;
        } else {
            self.entries.push((pattern, pricing));
        }
    }

    /// Overlay caller-supplied pricing; overlay entries win over the
    /// seeded table when patterns collide.
    pub fn overlay(&mut self, custom: &HashMap<String, ModelPricing>) {
        for (pattern, pricing) in custom {
            self.insert(pattern.clone(), pricing.clone());
        }
    }

    /// Resolve pricing for a model or provider name. Among matching
    /// patterns the longest wins, so `gpt-4o-mini` beats `gpt-4o`.
    pub fn lookup(&self, name: &str) -> &ModelPricing {
        let needle = name.to_lowercase();
        self.entries
            .iter()
            .filter(|(pattern, _)| needle.contains(pattern.as_str()))
            .max_by_key(|(pattern, _)| pattern.len())
            .map(|(_, pricing)| pricing)
            .unwrap_or(&self.default)
    }

    /// Pure cost estimate for `name` at the given token counts.
    pub fn cost_for(&self, name: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        self.lookup(name).cost(input_tokens, output_tokens)
    }
}
