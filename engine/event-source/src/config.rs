//! Kafka consumer configuration

use rdkafka::ClientConfig;
use serde::{Deserialize, Serialize};

/// Where a fresh consumer group starts reading.
///
/// Committed group offsets always take precedence when they exist; the
/// policy applies when the group has none yet (`Committed` behaves like
/// `Earliest` on a brand-new group so no history is silently skipped).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartingOffset {
    Earliest,
    Latest,
    Committed,
}

/// Configuration for the transaction log consumer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Kafka bootstrap servers (comma-separated)
    pub brokers: String,

    /// Topic carrying transaction payloads
    pub topic: String,

    /// Consumer group id
    pub group_id: String,

    /// Starting-offset policy for a group without committed offsets
    pub starting_offset: StartingOffset,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            topic: "financial_transactions".to_string(),
            group_id: "commerce-pipeline".to_string(),
            starting_offset: StartingOffset::Earliest,
        }
    }
}

impl SourceConfig {
    /// Build the rdkafka client configuration.
    ///
    /// Auto-commit is off: the source commits each offset itself, strictly
    /// after the event has been handed to the pipeline.
    pub fn consumer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.brokers);
        config.set("group.id", &self.group_id);
        config.set("enable.auto.commit", "false");
        config.set(
            "auto.offset.reset",
            match self.starting_offset {
                StartingOffset::Earliest | StartingOffset::Committed => "earliest",
                StartingOffset::Latest => "latest",
            },
        );
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumer_config_disables_auto_commit() {
        let config = SourceConfig::default().consumer_config();
        assert_eq!(config.get("enable.auto.commit"), Some("false"));
        assert_eq!(config.get("group.id"), Some("commerce-pipeline"));
    }

    #[test]
    fn starting_offset_maps_to_reset_policy() {
        let mut source = SourceConfig::default();

        source.starting_offset = StartingOffset::Latest;
        assert_eq!(source.consumer_config().get("auto.offset.reset"), Some("latest"));

        source.starting_offset = StartingOffset::Committed;
        assert_eq!(source.consumer_config().get("auto.offset.reset"), Some("earliest"));
    }
}
