use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct TopicDetails {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i32,
    /// Every entry the broker returned, defaults and sensitive keys included.
    pub configurations: BTreeMap<String, String>,
}

impl TopicDetails {
    pub fn is_internal(&self) -> bool {
        self.name.starts_with("__")
    }

    pub fn is_compacted(&self) -> bool {
        self.configurations
            .get("cleanup.policy")
            .map(|policy| policy.split(',').any(|p| p.trim() == "compact"))
            .unwrap_or(false)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct TopicSummary {
    pub topics: usize,
    pub internal_topics: usize,
    pub total_partitions: i64,
    pub total_internal_partitions: i64,
    pub compacted_topics: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Topics {
    pub summary: TopicSummary,
    pub details: Vec<TopicDetails>,
}

impl Topics {
    /// Build the summary from a full topic list. Details are kept sorted by
    /// name.
    pub fn from_details(mut details: Vec<TopicDetails>) -> Self {
        details.sort_by(|a, b| a.name.cmp(&b.name));

        let mut summary = TopicSummary::default();
        for topic in &details {
            if topic.is_internal() {
                summary.internal_topics += 1;
                summary.total_internal_partitions += i64::from(topic.partitions);
            } else {
                summary.topics += 1;
                summary.total_partitions += i64::from(topic.partitions);
            }
            if topic.is_compacted() {
                summary.compacted_topics += 1;
            }
        }

        Self { summary, details }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.details.iter().any(|t| t.name == name)
    }
}
