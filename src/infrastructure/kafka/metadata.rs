//! Topic layout and configuration in two round trips.
//!
//! One Metadata request for every topic, then one DescribeConfigs request
//! naming every topic, sent to the controller. Any failure aborts the whole
//! fetch; callers never see a partial topic list.

use std::collections::BTreeMap;
use std::time::Duration;

use kafka_protocol::messages::describe_configs_request::DescribeConfigsResource;
use kafka_protocol::messages::{DescribeConfigsRequest, MetadataRequest, MetadataResponse};
use kafka_protocol::protocol::StrBytes;
use tracing::{debug, info, instrument, warn};

use crate::config::NetworkConfig;
use crate::domain::topic::{TopicDetails, Topics};
use crate::error::{classify_broker_code, ErrorClass, KafkaError, KafkaResult};
use crate::infrastructure::kafka::session::{AdminSession, SessionConnector};

/// DescribeConfigs resource type for topics.
const TOPIC_RESOURCE: i8 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterMetadata {
    pub cluster_id: String,
    pub topics: Topics,
}

/// Partition layout of one topic before configs are merged in.
struct TopicLayout {
    name: String,
    partitions: i32,
    replication_factor: i32,
}

pub struct BatchedMetadataFetcher<'a> {
    connector: &'a SessionConnector,
    retries: u32,
    backoff: Duration,
}

impl<'a> BatchedMetadataFetcher<'a> {
    pub fn new(connector: &'a SessionConnector, network: &NetworkConfig) -> Self {
        Self {
            connector,
            retries: network.metadata_retries,
            backoff: network.metadata_retry_backoff(),
        }
    }

    #[instrument(skip_all, fields(broker = session.address()))]
    pub async fn fetch(&self, session: &mut AdminSession) -> KafkaResult<ClusterMetadata> {
        let metadata = self.fetch_metadata(session).await?;
        let cluster_id = metadata
            .cluster_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_default();
        let layouts = topic_layouts(&metadata);
        info!(topics = layouts.len(), cluster_id = %cluster_id, "fetched cluster metadata");

        let controller = controller_address(&metadata);
        let topics = match controller {
            Some(address) if address != session.address() => {
                debug!(controller = %address, "opening controller session");
                let mut controller_session = self.connector.open(&address).await?;
                let result = describe_topic_configs(&mut controller_session, layouts).await;
                controller_session.close().await;
                result?
            }
            Some(_) => describe_topic_configs(session, layouts).await?,
            None => {
                warn!("cluster reports no controller; describing configs via bootstrap broker");
                describe_topic_configs(session, layouts).await?
            }
        };

        Ok(ClusterMetadata {
            cluster_id,
            topics: Topics::from_details(topics),
        })
    }

    /// Metadata for all topics, retrying broker-reported transient errors
    /// with a fixed backoff.
    async fn fetch_metadata(&self, session: &mut AdminSession) -> KafkaResult<MetadataResponse> {
        let version = session.version_for::<MetadataRequest>("Metadata")?;
        let request = MetadataRequest::default()
            .with_topics(None)
            .with_allow_auto_topic_creation(false);

        let mut attempt = 0;
        loop {
            let response = session.send(&request, version).await?;
            let failed = response.topics.iter().find(|t| t.error_code != 0);
            let Some(topic) = failed else {
                return Ok(response);
            };

            let code = topic.error_code;
            let name = topic
                .name
                .as_ref()
                .map(|n| n.0.to_string())
                .unwrap_or_default();
            if classify_broker_code(code) != ErrorClass::Transient || attempt >= self.retries {
                return Err(KafkaError::Broker {
                    operation: "Metadata",
                    resource: name,
                    code,
                    message: format!("after {} attempt(s)", attempt + 1),
                });
            }
            attempt += 1;
            warn!(topic = %name, code, attempt, "transient metadata error, retrying");
            tokio::time::sleep(self.backoff).await;
        }
    }
}

fn controller_address(metadata: &MetadataResponse) -> Option<String> {
    let controller = metadata.controller_id.0;
    if controller < 0 {
        return None;
    }
    metadata
        .brokers
        .iter()
        .find(|b| b.node_id.0 == controller)
        .map(|b| broker_address(&b.host, b.port))
}

/// `host:port`, with IPv6 literals bracketed.
fn broker_address(host: &str, port: i32) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn topic_layouts(metadata: &MetadataResponse) -> Vec<TopicLayout> {
    metadata
        .topics
        .iter()
        .filter_map(|topic| {
            let name = topic.name.as_ref()?.0.to_string();
            // Replication factor from the lowest-indexed partition.
            let replication_factor = topic
                .partitions
                .iter()
                .min_by_key(|p| p.partition_index)
                .map_or(0, |p| p.replica_nodes.len() as i32);
            Some(TopicLayout {
                name,
                partitions: topic.partitions.len() as i32,
                replication_factor,
            })
        })
        .collect()
}

/// One DescribeConfigs request for every topic. Entries are merged without
/// filtering; a null value becomes an empty string.
async fn describe_topic_configs(
    session: &mut AdminSession,
    layouts: Vec<TopicLayout>,
) -> KafkaResult<Vec<TopicDetails>> {
    if layouts.is_empty() {
        return Ok(Vec::new());
    }

    let version = session.version_for::<DescribeConfigsRequest>("DescribeConfigs")?;
    let request = DescribeConfigsRequest::default().with_resources(
        layouts
            .iter()
            .map(|layout| {
                DescribeConfigsResource::default()
                    .with_resource_type(TOPIC_RESOURCE)
                    .with_resource_name(StrBytes::from_string(layout.name.clone()))
                    .with_configuration_keys(None)
            })
            .collect(),
    );
    debug!(version, resources = layouts.len(), "describing topic configs");
    let response = session.send(&request, version).await?;

    let mut configs: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    for result in &response.results {
        let resource = result.resource_name.to_string();
        if result.error_code != 0 {
            return Err(KafkaError::Broker {
                operation: "DescribeConfigs",
                resource,
                code: result.error_code,
                message: result
                    .error_message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_default(),
            });
        }
        let entries = configs.entry(resource).or_default();
        for entry in &result.configs {
            entries.insert(
                entry.name.to_string(),
                entry.value.as_ref().map(|v| v.to_string()).unwrap_or_default(),
            );
        }
    }

    Ok(layouts
        .into_iter()
        .map(|layout| TopicDetails {
            configurations: configs.remove(&layout.name).unwrap_or_default(),
            name: layout.name,
            partitions: layout.partitions,
            replication_factor: layout.replication_factor,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::kafka::mock_broker::{MockBroker, MockCluster, MockTopic};
    use kafka_protocol::protocol::Request;
    use crate::infrastructure::kafka::session::{SaslCredentials, Transport};

    fn network() -> NetworkConfig {
        NetworkConfig {
            connect_timeout_ms: 1_000,
            request_timeout_ms: 1_000,
            metadata_retry_backoff_ms: 10,
            ..NetworkConfig::default()
        }
    }

    fn cluster() -> MockCluster {
        MockCluster {
            cluster_id: "abc-123".to_string(),
            topics: vec![
                MockTopic::new("orders", 6, 3).with_config("retention.ms", Some("604800000")),
                MockTopic::new("__consumer_offsets", 50, 3)
                    .with_config("sasl.jaas.config", None),
            ],
            ..MockCluster::default()
        }
    }

    async fn fetch_from(broker: &MockBroker) -> KafkaResult<ClusterMetadata> {
        let network = network();
        let connector = SessionConnector::new(Transport::Plain, SaslCredentials::None, &network);
        let mut session = connector.open(&broker.address).await?;
        let result = BatchedMetadataFetcher::new(&connector, &network)
            .fetch(&mut session)
            .await;
        session.close().await;
        result
    }

    #[tokio::test]
    async fn test_fetch_merges_configs_in_one_request() {
        let broker = MockBroker::start(cluster()).await;
        let metadata = fetch_from(&broker).await.unwrap();

        assert_eq!(metadata.cluster_id, "abc-123");
        assert_eq!(metadata.topics.details.len(), 2);
        let orders = &metadata.topics.details[1];
        assert_eq!(orders.name, "orders");
        assert_eq!(orders.partitions, 6);
        assert_eq!(orders.replication_factor, 3);
        assert_eq!(orders.configurations["retention.ms"], "604800000");

        let offsets = &metadata.topics.details[0];
        assert_eq!(offsets.configurations["sasl.jaas.config"], "");
        assert_eq!(broker.requests_for(DescribeConfigsRequest::KEY), 1);
    }

    #[tokio::test]
    async fn test_fetch_is_idempotent() {
        let broker = MockBroker::start(cluster()).await;
        let first = fetch_from(&broker).await.unwrap();
        let second = fetch_from(&broker).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_transient_metadata_error_is_retried() {
        let broker = MockBroker::start(MockCluster {
            transient_metadata_errors: 2,
            ..cluster()
        })
        .await;
        let metadata = fetch_from(&broker).await.unwrap();
        assert_eq!(metadata.topics.details.len(), 2);
        assert_eq!(broker.requests_for(MetadataRequest::KEY), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let broker = MockBroker::start(MockCluster {
            transient_metadata_errors: 10,
            ..cluster()
        })
        .await;
        let err = fetch_from(&broker).await.unwrap_err();
        assert!(matches!(err, KafkaError::Broker { code: 5, .. }));
        assert_eq!(broker.requests_for(MetadataRequest::KEY), 4);
    }

    #[tokio::test]
    async fn test_config_error_aborts_fetch() {
        let broker = MockBroker::start(cluster()).await;
        // TOPIC_AUTHORIZATION_FAILED
        broker.update(|c| c.config_error = Some(("orders".to_string(), 29)));
        let err = fetch_from(&broker).await.unwrap_err();
        assert!(matches!(
            err,
            KafkaError::Broker { operation: "DescribeConfigs", ref resource, code: 29, .. } if resource == "orders"
        ));
    }

    #[test]
    fn test_ipv6_broker_address_is_bracketed() {
        assert_eq!(broker_address("b-1.example", 9098), "b-1.example:9098");
        assert_eq!(broker_address("10.0.0.7", 9092), "10.0.0.7:9092");
        assert_eq!(broker_address("fd00::7", 9092), "[fd00::7]:9092");
        assert_eq!(broker_address("[fd00::7]", 9092), "[fd00::7]:9092");
    }

    #[tokio::test]
    async fn test_unknown_controller_uses_bootstrap_session() {
        let broker = MockBroker::start(MockCluster {
            controller_id: Some(-1),
            ..cluster()
        })
        .await;
        let metadata = fetch_from(&broker).await.unwrap();
        assert_eq!(metadata.topics.summary.internal_topics, 1);
    }

    #[tokio::test]
    async fn test_empty_cluster_skips_describe_configs() {
        let broker = MockBroker::start(MockCluster::default()).await;
        let metadata = fetch_from(&broker).await.unwrap();
        assert!(metadata.topics.details.is_empty());
        assert_eq!(broker.requests_for(DescribeConfigsRequest::KEY), 0);
    }
}
