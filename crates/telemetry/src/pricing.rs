//! Built-in pricing table for common chat models.
//!
//! Prices are in USD per 1 million tokens. Cached input tokens are billed
//! at the discounted rate when the model has one, otherwise at the normal
//! input rate. Custom pricing can be added at runtime.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
    /// Price per 1M input tokens served from a prompt cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_input_per_m: Option<f64>,
}

impl ModelPricing {
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
            cached_input_per_m: None,
        }
    }

    pub fn with_cached_input(mut self, cached_input_per_m: f64) -> Self {
        self.cached_input_per_m = Some(cached_input_per_m);
        self
    }

    /// Cost in USD. `cached_input_tokens` is the cached share of
    /// `input_tokens`, not an addition to it.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64, cached_input_tokens: u64) -> f64 {
        let cached = cached_input_tokens.min(input_tokens);
        let uncached = input_tokens - cached;
        let cached_rate = self.cached_input_per_m.unwrap_or(self.input_per_m);
        (uncached as f64 * self.input_per_m
            + cached as f64 * cached_rate
            + output_tokens as f64 * self.output_per_m)
            / 1_000_000.0
    }
}

/// Thread-safe pricing table with built-in defaults and custom overrides.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let mut prices = HashMap::new();

        // ── Anthropic ──────────────────────────────────────────────
        prices.insert(
            "anthropic/claude-sonnet-4".into(),
            ModelPricing::new(3.0, 15.0).with_cached_input(0.3),
        );
        prices.insert(
            "anthropic/claude-opus-4".into(),
            ModelPricing::new(15.0, 75.0).with_cached_input(1.5),
        );
        prices.insert(
            "anthropic/claude-3.5-haiku".into(),
            ModelPricing::new(0.8, 4.0).with_cached_input(0.08),
        );

        // ── OpenAI ─────────────────────────────────────────────────
        prices.insert(
            "openai/gpt-4o".into(),
            ModelPricing::new(2.5, 10.0).with_cached_input(1.25),
        );
        prices.insert(
            "openai/gpt-4o-mini".into(),
            ModelPricing::new(0.15, 0.6).with_cached_input(0.075),
        );
        prices.insert("openai/o3-mini".into(), ModelPricing::new(1.1, 4.4).with_cached_input(0.55));

        // ── Google ─────────────────────────────────────────────────
        prices.insert(
            "google/gemini-2.0-flash".into(),
            ModelPricing::new(0.1, 0.4).with_cached_input(0.025),
        );
        prices.insert(
            "google/gemini-1.5-pro".into(),
            ModelPricing::new(1.25, 5.0).with_cached_input(0.3125),
        );
        prices.insert(
            "google/gemini-1.5-flash".into(),
            ModelPricing::new(0.075, 0.3).with_cached_input(0.01875),
        );

        // ── Mistral ────────────────────────────────────────────────
        prices.insert("mistral/mistral-large".into(), ModelPricing::new(2.0, 6.0));
        prices.insert("mistral/mistral-small".into(), ModelPricing::new(0.2, 0.6));

        // ── DeepSeek ───────────────────────────────────────────────
        prices.insert(
            "deepseek/deepseek-v3".into(),
            ModelPricing::new(0.27, 1.1).with_cached_input(0.07),
        );

        Self {
            prices: RwLock::new(prices),
        }
    }

    /// Create an empty pricing table.
    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Exact lookup.
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);
        prices.get(model).cloned()
    }

    /// Add or update pricing for a model.
    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        let mut prices = self.prices.write().unwrap_or_else(PoisonError::into_inner);
        prices.insert(model.into(), pricing);
    }

    /// Find pricing for a model name as reported by a provider.
    ///
    /// Tries an exact match, then the bare name against bare keys
    /// (`gpt-4o` matches `openai/gpt-4o`), then the longest key whose bare
    /// name prefixes the model (`gpt-4o-mini-2024-07-18` matches
    /// `gpt-4o-mini`).
    pub fn lookup(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);

        if let Some(p) = prices.get(model) {
            return Some(p.clone());
        }

        let model_lower = model.to_lowercase();
        let bare_model = bare(&model_lower);

        let mut best: Option<(usize, &ModelPricing)> = None;
        for (key, pricing) in prices.iter() {
            let bare_key = bare(key).to_lowercase();
            if bare_model == bare_key {
                return Some(pricing.clone());
            }
            if bare_model.starts_with(&bare_key)
                && best.is_none_or(|(len, _)| bare_key.len() > len)
            {
                best = Some((bare_key.len(), pricing));
            }
        }

        best.map(|(_, p)| p.clone())
    }

    /// Cost for a call, or `None` when the model is unknown.
    pub fn compute_cost(
        &self,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        cached_input_tokens: u64,
    ) -> Option<f64> {
        self.lookup(model)
            .map(|p| p.cost(input_tokens, output_tokens, cached_input_tokens))
    }

    /// All known model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = prices.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.prices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn bare(model: &str) -> &str {
    model.rsplit('/').next().unwrap_or(model)
}
