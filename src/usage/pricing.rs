use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// USD per one million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
}

impl ModelPrice {
    pub const fn new(input: f64, output: f64) -> Self {
        Self { input, output }
    }

    /// `input_side` already includes cache reads and writes.
    pub fn cost(&self, input_side: u64, output: u64) -> f64 {
        (input_side as f64 / 1e6) * self.input + (output as f64 / 1e6) * self.output
    }
}

/// Mid-tier price used when no table entry matches.
pub const DEFAULT_PRICE: ModelPrice = ModelPrice::new(3.0, 15.0);

const BUILTIN_PRICES: &[(&str, f64, f64)] = &[
    ("anthropic/claude-sonnet-4-6", 3.0, 15.0),
    ("anthropic/claude-opus-4-6", 15.0, 75.0),
    ("anthropic/claude-haiku-3.5", 0.80, 4.0),
    ("anthropic/claude-sonnet-3.5", 3.0, 15.0),
    ("google/gemini-2.5-pro", 1.25, 10.0),
    ("google/gemini-2.5-flash", 0.075, 0.30),
    ("google/gemini-2.0-flash", 0.075, 0.30),
    ("openai/gpt-4o", 2.50, 10.0),
    ("openai/gpt-4o-mini", 0.15, 0.60),
    ("openai/o1", 15.0, 60.0),
    ("openai/o1-mini", 3.0, 12.0),
    ("openai/o3-mini", 1.10, 4.40),
    ("deepseek/deepseek-chat", 0.14, 0.28),
    ("deepseek/deepseek-reasoner", 0.55, 2.19),
];

/// How a model string was matched against the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriceMatch {
    Exact(String),
    Suffix(String),
    Default,
}

/// Immutable model price table, injected wherever cost is computed.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTable {
    entries: BTreeMap<String, ModelPrice>,
    default: ModelPrice,
}

impl Default for PriceTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PriceTable {
    pub fn new(entries: BTreeMap<String, ModelPrice>, default: ModelPrice) -> Self {
        Self { entries, default }
    }

    pub fn builtin() -> Self {
        let entries = BUILTIN_PRICES
            .iter()
            .map(|(model, input, output)| (model.to_string(), ModelPrice::new(*input, *output)))
            .collect();
        Self::new(entries, DEFAULT_PRICE)
    }

    pub fn with_overrides(mut self, overrides: BTreeMap<String, ModelPrice>) -> Self {
        self.entries.extend(overrides);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact key, then the longest table suffix contained in `model`, then the default.
    pub fn resolve(&self, model: Option<&str>) -> (ModelPrice, PriceMatch) {
        let Some(model) = model.filter(|m| !m.is_empty()) else {
            return (self.default, PriceMatch::Default);
        };

        if let Some(price) = self.entries.get(model) {
            return (*price, PriceMatch::Exact(model.to_string()));
        }

        let mut best: Option<(&str, &String, &ModelPrice)> = None;
        for (key, price) in &self.entries {
            let suffix = key.rsplit('/').next().unwrap_or(key);
            if suffix.is_empty() || !model.contains(suffix) {
                continue;
            }
            if best.map_or(true, |(s, _, _)| suffix.len() > s.len()) {
                best = Some((suffix, key, price));
            }
        }

        match best {
            Some((_, key, price)) => (*price, PriceMatch::Suffix(key.clone())),
            None => (self.default, PriceMatch::Default),
        }
    }

    pub fn price_for(&self, model: Option<&str>) -> ModelPrice {
        self.resolve(model).0
    }
}
