//! In-memory usage ledger.
//!
//! Keeps every tracked record together with its estimated cost and serves
//! per-agent and per-conversation reports.

use crate::TelemetryError;
use crate::pricing::PricingTable;
use crate::summary::{AgentUsage, UsageSummary};
use async_trait::async_trait;
use parley_core::usage::{UsageRecord, UsageTracker};
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// A usage record with its estimated cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedRecord {
    #[serde(flatten)]
    pub record: UsageRecord,
    /// `None` when the model is unknown or unreported.
    pub cost_usd: Option<f64>,
}

/// Thread-safe ledger of usage records.
pub struct UsageLedger {
    pricing: PricingTable,
    records: RwLock<Vec<PricedRecord>>,
    /// Oldest records are dropped beyond this many. `None` keeps everything.
    capacity: Option<usize>,
}

impl UsageLedger {
    /// Create a ledger with default pricing.
    pub fn new() -> Self {
        Self::with_pricing(PricingTable::with_defaults())
    }

    /// Create a ledger with custom pricing.
    pub fn with_pricing(pricing: PricingTable) -> Self {
        Self {
            pricing,
            records: RwLock::new(Vec::new()),
            capacity: None,
        }
    }

    /// Keep at most `capacity` records.
    pub fn with_capacity_limit(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Price and store a record.
    pub fn record(&self, record: UsageRecord) -> PricedRecord {
        let cost_usd = record.model.as_deref().and_then(|model| {
            self.pricing.compute_cost(
                model,
                record.input_tokens.unwrap_or(0),
                record.output_tokens.unwrap_or(0),
                record.cached_input_tokens.unwrap_or(0),
            )
        });
        let priced = PricedRecord { record, cost_usd };

        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.push(priced.clone());
        if let Some(capacity) = self.capacity {
            let excess = records.len().saturating_sub(capacity);
            if excess > 0 {
                records.drain(..excess);
            }
        }
        priced
    }

    /// All records, oldest first.
    pub fn records(&self) -> Vec<PricedRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn records_for_conversation(&self, conversation_id: &str) -> Vec<PricedRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.record.conversation_id.as_deref() == Some(conversation_id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Totals across all agents.
    pub fn summary(&self) -> UsageSummary {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut summary = UsageSummary::default();

        for priced in records.iter() {
            let record = &priced.record;
            let agent = summary
                .agents
                .entry(record.agent_name.clone())
                .or_insert_with(|| AgentUsage::new(record.agent_name.clone()));
            accumulate(agent, priced);

            summary.calls += 1;
            summary.total_tokens += record.total_tokens.unwrap_or(0);
            summary.cost_usd += priced.cost_usd.unwrap_or(0.0);
        }

        summary
    }

    /// Totals for one agent.
    pub fn agent_usage(&self, agent_name: &str) -> Result<AgentUsage, TelemetryError> {
        self.summary()
            .agents
            .remove(agent_name)
            .ok_or_else(|| TelemetryError::UnknownAgent(agent_name.to_string()))
    }

    /// All records as a JSON array.
    pub fn export_json(&self) -> Result<String, TelemetryError> {
        Ok(serde_json::to_string_pretty(&self.records())?)
    }
}

impl Default for UsageLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn accumulate(agent: &mut AgentUsage, priced: &PricedRecord) {
    let record = &priced.record;
    agent.calls += 1;
    agent.input_tokens += record.input_tokens.unwrap_or(0);
    agent.output_tokens += record.output_tokens.unwrap_or(0);
    agent.cached_input_tokens += record.cached_input_tokens.unwrap_or(0);
    agent.total_tokens += record.total_tokens.unwrap_or(0);
    match priced.cost_usd {
        Some(cost) => agent.cost_usd += cost,
        None => agent.unpriced_calls += 1,
    }
}

#[async_trait]
impl UsageTracker for UsageLedger {
    async fn track(&self, record: UsageRecord) -> parley_core::Result<()> {
        let priced = self.record(record);
        debug!(
            agent = %priced.record.agent_name,
            total_tokens = ?priced.record.total_tokens,
            cost_usd = ?priced.cost_usd,
            "Usage recorded in ledger"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::ModelPricing;
    use parley_core::chat::UsageDetails;

    fn record(agent: &str, model: Option<&str>, input: u64, output: u64) -> UsageRecord {
        UsageRecord::new(agent, &UsageDetails::new(input, output))
            .with_model(model.map(String::from))
            .with_conversation(Some(format!("{agent}-conv")))
    }

    fn ledger() -> UsageLedger {
        let pricing = PricingTable::empty();
        pricing.set("test/model", ModelPricing::new(1.0, 2.0));
        UsageLedger::with_pricing(pricing)
    }

    #[test]
    fn records_are_priced() {
        let ledger = ledger();
        let priced = ledger.record(record("a", Some("test/model"), 1_000_000, 1_000_000));
        assert!((priced.cost_usd.unwrap() - 3.0).abs() < 1e-10);

        let unpriced = ledger.record(record("a", Some("other"), 10, 10));
        assert_eq!(unpriced.cost_usd, None);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn summary_groups_by_agent() {
        let ledger = ledger();
        ledger.record(record("support", Some("test/model"), 100, 50));
        ledger.record(record("support", None, 10, 5));
        ledger.record(record("sales", Some("test/model"), 1, 1));

        let summary = ledger.summary();
        assert_eq!(summary.calls, 3);
        assert_eq!(summary.total_tokens, 167);
        assert_eq!(summary.agents.len(), 2);

        let support = &summary.agents["support"];
        assert_eq!(support.calls, 2);
        assert_eq!(support.input_tokens, 110);
        assert_eq!(support.unpriced_calls, 1);
    }

    #[test]
    fn unknown_agent_is_an_error() {
        let ledger = ledger();
        assert!(matches!(
            ledger.agent_usage("ghost"),
            Err(TelemetryError::UnknownAgent(_))
        ));
    }

    #[test]
    fn capacity_drops_oldest() {
        let ledger = ledger().with_capacity_limit(2);
        ledger.record(record("first", None, 1, 1));
        ledger.record(record("second", None, 1, 1));
        ledger.record(record("third", None, 1, 1));

        let names: Vec<String> = ledger
            .records()
            .into_iter()
            .map(|r| r.record.agent_name)
            .collect();
        assert_eq!(names, vec!["second", "third"]);
    }

    #[test]
    fn filter_by_conversation_and_export() {
        let ledger = ledger();
        ledger.record(record("a", None, 1, 1));
        ledger.record(record("b", None, 1, 1));

        assert_eq!(ledger.records_for_conversation("a-conv").len(), 1);
        let json = ledger.export_json().unwrap();
        let parsed: Vec<PricedRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 2);

        ledger.clear();
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn tracker_impl_records() {
        let ledger = ledger();
        ledger
            .track(record("a", Some("test/model"), 5, 5))
            .await
            .unwrap();
        assert_eq!(ledger.agent_usage("a").unwrap().calls, 1);
    }
}
