//! Self-managed Kafka Connect metadata recovered from internal topics.
//!
//! Kafka Connect keeps connector configuration and status only as keyed
//! records in its configs and status topics. The folds here turn a sequence
//! of raw records into the latest value per connector.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Key prefix of connector configuration records in the configs topic.
pub const CONNECTOR_CONFIG_PREFIX: &str = "connector-";

/// Key prefix of connector status records in the status topic.
pub const CONNECTOR_STATUS_PREFIX: &str = "status-connector-";

/// A record read from an internal topic, detached from the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub partition: i32,
    pub offset: i64,
    /// Milliseconds since the epoch, when the broker reported one.
    pub timestamp: Option<i64>,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
}

impl ScanRecord {
    fn key_str(&self) -> Option<&str> {
        self.key
            .as_deref()
            .and_then(|k| std::str::from_utf8(k).ok())
    }

    /// Timestamp with "missing" and non-positive values collapsed to zero.
    fn effective_timestamp(&self) -> i64 {
        self.timestamp.filter(|ts| *ts > 0).unwrap_or(0)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct SelfManagedConnector {
    pub name: String,
    pub config: BTreeMap<String, Value>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub connect_host: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct SelfManagedConnectors {
    pub connectors: Vec<SelfManagedConnector>,
}

#[derive(Debug)]
struct RetainedConfig {
    timestamp: i64,
    /// `None` marks a tombstone.
    config: Option<BTreeMap<String, Value>>,
}

/// Last-write-wins fold over the configs topic.
#[derive(Debug, Default)]
pub struct ConnectorConfigFold {
    entries: BTreeMap<String, RetainedConfig>,
}

impl ConnectorConfigFold {
    pub fn apply(&mut self, record: &ScanRecord) {
        let Some(name) = record
            .key_str()
            .and_then(|key| key.strip_prefix(CONNECTOR_CONFIG_PREFIX))
        else {
            return;
        };

        let timestamp = record.effective_timestamp();
        if let Some(existing) = self.entries.get(name) {
            // Records arrive in offset order; only a strictly older
            // timestamp keeps the retained value.
            if timestamp > 0 && existing.timestamp > 0 && timestamp < existing.timestamp {
                debug!(connector = name, offset = record.offset, "ignoring older config record");
                return;
            }
        }

        let config = match record.payload.as_deref() {
            None => None,
            Some(payload) => match parse_connector_config(payload) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!(
                        connector = name,
                        partition = record.partition,
                        offset = record.offset,
                        error = %e,
                        "skipping malformed connector config record"
                    );
                    return;
                }
            },
        };

        self.entries
            .insert(name.to_string(), RetainedConfig { timestamp, config });
    }

    pub fn len(&self) -> usize {
        self.entries.values().filter(|e| e.config.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn into_configs(self) -> BTreeMap<String, BTreeMap<String, Value>> {
        self.entries
            .into_iter()
            .filter_map(|(name, entry)| entry.config.map(|config| (name, config)))
            .collect()
    }
}

fn parse_connector_config(payload: &[u8]) -> Result<BTreeMap<String, Value>, String> {
    let value: Value = serde_json::from_slice(payload).map_err(|e| e.to_string())?;
    let object = match value {
        Value::Object(mut object) => match object.remove("properties") {
            Some(Value::Object(properties)) => properties,
            Some(other) => {
                object.insert("properties".to_string(), other);
                object
            }
            None => object,
        },
        other => return Err(format!("expected a JSON object, got {other}")),
    };
    Ok(object.into_iter().collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorStatus {
    pub state: Option<String>,
    pub worker_id: Option<String>,
}

#[derive(Debug)]
struct RetainedStatus {
    timestamp: i64,
    offset: i64,
    status: ConnectorStatus,
}

#[derive(Deserialize)]
struct StatusPayload {
    state: Option<String>,
    worker_id: Option<String>,
}

/// Newest-record-wins fold over the status topic.
#[derive(Debug, Default)]
pub struct ConnectorStatusFold {
    entries: BTreeMap<String, RetainedStatus>,
}

impl ConnectorStatusFold {
    pub fn apply(&mut self, record: &ScanRecord) {
        let Some(name) = record
            .key_str()
            .and_then(|key| key.strip_prefix(CONNECTOR_STATUS_PREFIX))
        else {
            return;
        };
        let Some(payload) = record.payload.as_deref() else {
            return;
        };

        let rank = (record.effective_timestamp(), record.offset);
        if let Some(existing) = self.entries.get(name) {
            if rank <= (existing.timestamp, existing.offset) {
                return;
            }
        }

        let parsed: StatusPayload = match serde_json::from_slice(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(
                    connector = name,
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "skipping malformed connector status record"
                );
                return;
            }
        };

        self.entries.insert(
            name.to_string(),
            RetainedStatus {
                timestamp: rank.0,
                offset: rank.1,
                status: ConnectorStatus {
                    state: parsed.state,
                    worker_id: parsed.worker_id,
                },
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&ConnectorStatus> {
        self.entries.get(name).map(|e| &e.status)
    }
}

/// Join configs with statuses. Configs decide which connectors exist.
pub fn merge_connectors(
    configs: ConnectorConfigFold,
    statuses: &ConnectorStatusFold,
) -> Vec<SelfManagedConnector> {
    configs
        .into_configs()
        .into_iter()
        .map(|(name, config)| {
            let status = statuses.get(&name);
            SelfManagedConnector {
                config,
                state: status.and_then(|s| s.state.clone()),
                connect_host: status.and_then(|s| s.worker_id.clone()),
                name,
            }
        })
        .collect()
}
