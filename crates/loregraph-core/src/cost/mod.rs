//! Extraction cost accounting
//!
//! This module provides:
//! - Token usage for a single completion call
//! - Cost calculation from a per-model pricing table
//! - A per-project ledger aggregating extraction spend

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Token usage for a single completion call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of input/prompt tokens
    pub input_tokens: u32,
    /// Number of output/completion tokens
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Total tokens (input + output)
    pub fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Pricing information for a model (per million tokens)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPricing {
    pub model: String,
    /// Cost per million input tokens in USD
    pub input_price_per_million: f64,
    /// Cost per million output tokens in USD
    pub output_price_per_million: f64,
}

impl ModelPricing {
    pub fn new(model: impl Into<String>, input_price: f64, output_price: f64) -> Self {
        Self {
            model: model.into(),
            input_price_per_million: input_price,
            output_price_per_million: output_price,
        }
    }

    /// Cost for given token usage as `(input, output)` in USD
    pub fn calculate_cost(&self, tokens: &TokenUsage) -> (f64, f64) {
        let input_cost = (tokens.input_tokens as f64 / 1_000_000.0) * self.input_price_per_million;
        let output_cost =
            (tokens.output_tokens as f64 / 1_000_000.0) * self.output_price_per_million;
        (input_cost, output_cost)
    }
}

/// Default pricing for commonly used extraction models
pub fn default_pricing_table() -> HashMap<String, ModelPricing> {
    let mut table = HashMap::new();

    for pricing in [
        ModelPricing::new("anthropic/claude-sonnet-4-20250514", 3.0, 15.0),
        ModelPricing::new("anthropic/claude-3-5-haiku-latest", 0.80, 4.0),
        ModelPricing::new("anthropic/claude-opus-4-20250514", 15.0, 75.0),
        ModelPricing::new("openai/gpt-4o", 2.50, 10.0),
        ModelPricing::new("openai/gpt-4o-mini", 0.15, 0.60),
    ] {
        table.insert(pricing.model.clone(), pricing);
    }

    table
}

/// Pricing lookup for completion calls
#[derive(Debug, Clone)]
pub struct PricingTable {
    models: HashMap<String, ModelPricing>,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            models: default_pricing_table(),
        }
    }
}

impl PricingTable {
    /// Table with no known models; every call costs zero
    pub fn empty() -> Self {
        Self {
            models: HashMap::new(),
        }
    }

    /// Add or replace a model's pricing
    pub fn with_pricing(mut self, pricing: ModelPricing) -> Self {
        self.models.insert(pricing.model.clone(), pricing);
        self
    }

    pub fn get(&self, model: &str) -> Option<&ModelPricing> {
        self.models.get(model)
    }

    /// Cost in USD of one call; unknown models are free
    pub fn cost_of(&self, model: &str, tokens: &TokenUsage) -> f64 {
        self.models
            .get(model)
            .map(|p| {
                let (input, output) = p.calculate_cost(tokens);
                input + output
            })
            .unwrap_or(0.0)
    }
}

/// Cost of one extraction job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCost {
    pub job_id: String,
    pub project_id: String,
    pub model: Option<String>,
    pub tokens: TokenUsage,
    pub cost_usd: f64,
    pub timestamp: DateTime<Utc>,
}

/// Aggregated spend for one project
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectCostSummary {
    pub project_id: String,
    pub total_cost_usd: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    /// Number of jobs that made a completion call
    pub job_count: u64,
    /// Cost per model
    pub by_model: HashMap<String, f64>,
}

impl ProjectCostSummary {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    /// Fold one job's cost into the summary
    pub fn add(&mut self, cost: &JobCost) {
        self.total_cost_usd += cost.cost_usd;
        self.total_input_tokens += cost.tokens.input_tokens as u64;
        self.total_output_tokens += cost.tokens.output_tokens as u64;
        self.job_count += 1;
        if let Some(model) = &cost.model {
            *self.by_model.entry(model.clone()).or_default() += cost.cost_usd;
        }
    }
}

/// In-memory ledger of extraction cost per project
///
/// Cheap to clone; clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct CostLedger {
    pricing: PricingTable,
    summaries: Arc<RwLock<HashMap<String, ProjectCostSummary>>>,
}

impl CostLedger {
    pub fn new(pricing: PricingTable) -> Self {
        Self {
            pricing,
            summaries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Price a completion call and record it against the project
    pub fn record(
        &self,
        project_id: &str,
        job_id: &str,
        model: &str,
        tokens: TokenUsage,
    ) -> JobCost {
        let cost = JobCost {
            job_id: job_id.to_string(),
            project_id: project_id.to_string(),
            model: Some(model.to_string()),
            tokens,
            cost_usd: self.pricing.cost_of(model, &tokens),
            timestamp: Utc::now(),
        };

        if let Ok(mut summaries) = self.summaries.write() {
            summaries
                .entry(project_id.to_string())
                .or_insert_with(|| ProjectCostSummary::new(project_id))
                .add(&cost);
        }

        cost
    }

    /// Spend recorded for a project since the ledger was created
    pub fn project_summary(&self, project_id: &str) -> ProjectCostSummary {
        self.summaries
            .read()
            .ok()
            .and_then(|s| s.get(project_id).cloned())
            .unwrap_or_else(|| ProjectCostSummary::new(project_id))
    }

    /// Total spend across all projects
    pub fn total(&self) -> f64 {
        self.summaries
            .read()
            .map(|s| s.values().map(|p| p.total_cost_usd).sum())
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_usage() {
        let usage = TokenUsage::new(100, 50);
        assert_eq!(usage.total(), 150);
    }

    #[test]
    fn test_model_pricing_calculation() {
        let pricing = ModelPricing::new("test-model", 3.0, 15.0);
        let (input_cost, output_cost) = pricing.calculate_cost(&TokenUsage::new(1_000_000, 500_000));

        assert!((input_cost - 3.0).abs() < 0.001);
        assert!((output_cost - 7.5).abs() < 0.001);
    }

    #[test]
    fn test_unknown_model_is_free() {
        let table = PricingTable::default();
        assert_eq!(table.cost_of("local/unknown", &TokenUsage::new(5000, 5000)), 0.0);
        assert!(table.get("openai/gpt-4o-mini").is_some());
    }

    #[test]
    fn test_ledger_aggregates_per_project() {
        let ledger = CostLedger::new(
            PricingTable::empty().with_pricing(ModelPricing::new("m", 1.0, 2.0)),
        );

        ledger.record("p1", "j1", "m", TokenUsage::new(1_000_000, 0));
        ledger.record("p1", "j2", "m", TokenUsage::new(0, 1_000_000));
        ledger.record("p2", "j3", "m", TokenUsage::new(1_000_000, 0));

        let summary = ledger.project_summary("p1");
        assert_eq!(summary.job_count, 2);
        assert!((summary.total_cost_usd - 3.0).abs() < 1e-9);
        assert!((summary.by_model["m"] - 3.0).abs() < 1e-9);
        assert!((ledger.total() - 4.0).abs() < 1e-9);
        assert_eq!(ledger.project_summary("none").job_count, 0);
    }

    #[test]
    fn test_ledger_clones_share_records() {
        let ledger = CostLedger::default();
        let clone = ledger.clone();
        clone.record("p", "j", "openai/gpt-4o", TokenUsage::new(1000, 1000));
        assert_eq!(ledger.project_summary("p").job_count, 1);
    }
}
