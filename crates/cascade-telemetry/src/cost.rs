//! Per-layer cost accounting

use crate::types::{LayerId, TokenUsage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

const TOKENS_PER_UNIT: f64 = 1_000_000.0;

/// Dollar prices per million tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub embedding_per_million: f64,
    pub completion_input_per_million: f64,
    pub completion_output_per_million: f64,
}

impl Pricing {
    pub fn new() -> Self {
        Self {
            embedding_per_million: 0.02,
            completion_input_per_million: 0.15,
            completion_output_per_million: 0.60,
        }
    }

    pub fn cost_of(&self, usage: &TokenUsage) -> f64 {
        self.components(usage).total()
    }

    fn components(&self, usage: &TokenUsage) -> Components {
        let per_token =
            |tokens: u64, per_million: f64| tokens as f64 / TOKENS_PER_UNIT * per_million;
        Components {
            embedding: per_token(usage.embedding_tokens, self.embedding_per_million),
            input: per_token(usage.completion_input_tokens, self.completion_input_per_million),
            output: per_token(usage.completion_output_tokens, self.completion_output_per_million),
            flat: usage.flat_cost,
        }
    }
}

/// Dollar cost of one usage, split by rate
struct Components {
    embedding: f64,
    input: f64,
    output: f64,
    flat: f64,
}

impl Components {
    fn total(&self) -> f64 {
        self.embedding + self.input + self.output + self.flat
    }
}

impl Default for Pricing {
    fn default() -> Self {
        Self::new()
    }
}

/// What a layer invocation consumed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Charge {
    Tokens(TokenUsage),
    /// Flat dollar cost for a single call
    Flat(f64),
}

impl Charge {
    fn usage(self) -> TokenUsage {
        match self {
            Charge::Tokens(usage) => usage,
            Charge::Flat(cost) => TokenUsage::flat(cost),
        }
    }
}

/// Running totals for one layer
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CostRecord {
    pub embedding_tokens: u64,
    pub completion_input_tokens: u64,
    pub completion_output_tokens: u64,
    pub embedding_cost: f64,
    pub completion_input_cost: f64,
    pub completion_output_cost: f64,
    pub flat_cost: f64,
    pub total_cost: f64,
    pub call_count: u64,
}

impl CostRecord {
    fn apply(&mut self, usage: &TokenUsage, pricing: &Pricing) -> f64 {
        let parts = pricing.components(usage);
        let charged = parts.total();

        self.embedding_tokens += usage.embedding_tokens;
        self.completion_input_tokens += usage.completion_input_tokens;
        self.completion_output_tokens += usage.completion_output_tokens;
        self.embedding_cost += parts.embedding;
        self.completion_input_cost += parts.input;
        self.completion_output_cost += parts.output;
        self.flat_cost += parts.flat;
        self.total_cost += charged;
        self.call_count += usage.api_calls.max(1);
        charged
    }
}

/// Point-in-time copy of every layer's cost record
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CostSnapshot {
    pub layers: BTreeMap<LayerId, CostRecord>,
}

impl CostSnapshot {
    pub fn get(&self, layer: LayerId) -> CostRecord {
        self.layers.get(&layer).copied().unwrap_or_default()
    }

    pub fn total_cost(&self) -> f64 {
        self.layers.values().map(|r| r.total_cost).sum()
    }

    pub fn total_calls(&self) -> u64 {
        self.layers.values().map(|r| r.call_count).sum()
    }

    pub fn total_tokens(&self) -> TokenUsage {
        let mut usage = TokenUsage::default();
        for record in self.layers.values() {
            usage.embedding_tokens += record.embedding_tokens;
            usage.completion_input_tokens += record.completion_input_tokens;
            usage.completion_output_tokens += record.completion_output_tokens;
        }
        usage
    }

    pub fn average_per_query(&self, queries: u64) -> f64 {
        if queries == 0 {
            0.0
        } else {
            self.total_cost() / queries as f64
        }
    }
}

/// Shared accumulator; every charge is serialized through one lock
#[derive(Debug, Default)]
pub struct CostAccumulator {
    pricing: Pricing,
    records: Mutex<BTreeMap<LayerId, CostRecord>>,
}

impl CostAccumulator {
    pub fn new(pricing: Pricing) -> Self {
        Self {
            pricing,
            records: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn pricing(&self) -> &Pricing {
        &self.pricing
    }

    /// Add a charge to `layer`'s running totals and return the dollars charged.
    ///
    /// Deterministic layers are zero-cost; charges against them are dropped.
    pub fn charge(&self, layer: LayerId, charge: Charge) -> f64 {
        if layer.is_deterministic() {
            tracing::warn!(%layer, ?charge, "ignoring charge against deterministic layer");
            return 0.0;
        }

        let usage = charge.usage();
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        records
            .entry(layer)
            .or_default()
            .apply(&usage, &self.pricing)
    }

    pub fn snapshot(&self) -> CostSnapshot {
        let records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        CostSnapshot {
            layers: records.clone(),
        }
    }
}
