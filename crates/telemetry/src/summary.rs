//! Aggregated usage views.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Totals for one agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentUsage {
    pub agent_name: String,
    /// Number of tracked calls.
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_input_tokens: u64,
    pub total_tokens: u64,
    /// Estimated cost in USD over calls whose model had a known price.
    pub cost_usd: f64,
    /// Calls whose model could not be priced.
    pub unpriced_calls: u64,
}

impl AgentUsage {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            ..Default::default()
        }
    }
}

/// Totals across all agents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub calls: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    /// Per-agent breakdown, keyed by agent name.
    pub agents: BTreeMap<String, AgentUsage>,
}
