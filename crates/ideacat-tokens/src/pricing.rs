//! Per-model prices, limits and encodings

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Encoding, RateLimits, Result, TokenError};

/// Price of `unit_size` tokens, in USD
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_price: f64,
    pub output_price: f64,
    #[serde(default = "default_unit_size")]
    pub unit_size: u64,
}

fn default_unit_size() -> u64 {
    1000
}

impl ModelPrice {
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let unit = self.unit_size.max(1) as f64;
        (input_tokens as f64 / unit) * self.input_price
            + (output_tokens as f64 / unit) * self.output_price
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    #[serde(flatten)]
    pub price: ModelPrice,
    #[serde(flatten)]
    pub limits: RateLimits,
    #[serde(default)]
    pub encoding: Encoding,
}

/// Lookup table keyed by model name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelCatalog {
    models: BTreeMap<String, ModelSpec>,
}

impl ModelCatalog {
    pub fn new(models: BTreeMap<String, ModelSpec>) -> Self {
        Self { models }
    }

    /// Fails with `UnknownModel`; there is no implicit fallback model
    pub fn get(&self, model: &str) -> Result<&ModelSpec> {
        self.models
            .get(model)
            .ok_or_else(|| TokenError::UnknownModel(model.to_string()))
    }

    pub fn calculate_cost(&self, input_tokens: u64, output_tokens: u64, model: &str) -> Result<f64> {
        Ok(self.get(model)?.price.cost(input_tokens, output_tokens))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Add entries from `other` whose names are not already present
    pub fn extend_missing(&mut self, other: ModelCatalog) {
        for (name, spec) in other.models {
            self.models.entry(name).or_insert(spec);
        }
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        let entry = |input: f64, output: f64, tpm: u64, rpd: Option<u64>, encoding| ModelSpec {
            price: ModelPrice {
                input_price: input,
                output_price: output,
                unit_size: 1000,
            },
            limits: RateLimits {
                tokens_per_minute: tpm,
                requests_per_minute: 500,
                requests_per_day: rpd,
            },
            encoding,
        };

        let mut models = BTreeMap::new();
        models.insert(
            "gpt-4".to_string(),
            entry(0.03, 0.06, 10_000, Some(10_000), Encoding::Cl100kBase),
        );
        models.insert(
            "gpt-4o".to_string(),
            entry(0.01, 0.03, 30_000, None, Encoding::O200kBase),
        );
        models.insert(
            "gpt-4o-mini".to_string(),
            entry(0.01, 0.03, 200_000, Some(10_000), Encoding::O200kBase),
        );
        models.insert(
            "gpt-4-turbo".to_string(),
            entry(0.01, 0.03, 30_000, None, Encoding::Cl100kBase),
        );
        models.insert(
            "gpt-3.5-turbo".to_string(),
            entry(0.0015, 0.002, 200_000, Some(10_000), Encoding::Cl100kBase),
        );

        Self { models }
    }
}
