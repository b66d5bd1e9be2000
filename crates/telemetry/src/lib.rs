//! Usage trackers for parley.
//!
//! [`UsageLedger`] keeps every record in memory and prices it against a
//! [`PricingTable`]; [`TracingUsageTracker`] turns records into structured
//! log events. Both implement `parley_core::UsageTracker`.

pub mod ledger;
pub mod pricing;
pub mod summary;
pub mod tracing_sink;

pub use ledger::{PricedRecord, UsageLedger};
pub use pricing::{ModelPricing, PricingTable};
pub use summary::{AgentUsage, UsageSummary};
pub use tracing_sink::TracingUsageTracker;

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("no usage recorded for agent: {0}")]
    UnknownAgent(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
