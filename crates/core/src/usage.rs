//! Usage records and the UsageTracker capability.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::UsageDetails;

/// Token usage for one completed call, attributed to an agent/conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Agent the call was made through.
    pub agent_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_input_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,

    /// Default tags merged with call-scoped properties.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    pub recorded_at: DateTime<Utc>,
}

impl UsageRecord {
    /// Build a record from reported usage. Counts are copied as-is; absent
    /// counts stay absent.
    pub fn new(agent_name: impl Into<String>, usage: &UsageDetails) -> Self {
        Self {
            agent_name: agent_name.into(),
            conversation_id: None,
            model: None,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cached_input_tokens: usage.cached_input_tokens,
            total_tokens: usage
                .total_tokens
                .or_else(|| match (usage.input_tokens, usage.output_tokens) {
                    (Some(i), Some(o)) => Some(i + o),
                    _ => None,
                }),
            tags: BTreeMap::new(),
            recorded_at: Utc::now(),
        }
    }

    pub fn with_conversation(mut self, conversation_id: Option<String>) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Merge default tags with call-scoped properties; call-scoped values win.
///
/// String values are taken verbatim, anything else is rendered as JSON text.
pub fn merge_tags(
    defaults: &BTreeMap<String, String>,
    call_scoped: &serde_json::Map<String, serde_json::Value>,
) -> BTreeMap<String, String> {
    let mut tags = defaults.clone();
    for (key, value) in call_scoped {
        let rendered = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        tags.insert(key.clone(), rendered);
    }
    tags
}

/// Sink for usage records (metrics pipeline, billing ledger, log).
#[async_trait]
pub trait UsageTracker: Send + Sync {
    async fn track(&self, record: UsageRecord) -> crate::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_scoped_tags_win() {
        let defaults = BTreeMap::from([
            ("team".to_string(), "search".to_string()),
            ("env".to_string(), "prod".to_string()),
        ]);
        let mut call = serde_json::Map::new();
        call.insert("env".into(), "staging".into());
        call.insert("priority".into(), serde_json::json!(3));

        let tags = merge_tags(&defaults, &call);
        assert_eq!(tags.len(), 3);
        assert_eq!(tags["team"], "search");
        assert_eq!(tags["env"], "staging");
        assert_eq!(tags["priority"], "3");
    }

    #[test]
    fn record_derives_total_only_when_both_counts_known() {
        let record = UsageRecord::new(
            "support",
            &UsageDetails {
                input_tokens: Some(100),
                output_tokens: Some(20),
                ..Default::default()
            },
        );
        assert_eq!(record.total_tokens, Some(120));

        let record = UsageRecord::new(
            "support",
            &UsageDetails {
                output_tokens: Some(20),
                ..Default::default()
            },
        );
        assert_eq!(record.input_tokens, None);
        assert_eq!(record.total_tokens, None);
    }
}
