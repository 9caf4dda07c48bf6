//! AWS SDK adapter for the [`ControlPlane`] seam.

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_kafka::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_kafka::types::{Cluster, ClusterType as MskClusterType};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ControlPlaneConfig;
use crate::domain::cluster::{
    BootstrapBrokers, BrokerNode, ClientAuthentication, ClusterConfiguration, ClusterType,
    CompatibleVersions, MskConnector,
};
use crate::error::{ControlPlaneError, ControlPlaneResult, ErrorClass};
use crate::infrastructure::control_plane::{
    ClusterDescription, ControlPlane, ControlPlaneFactory, Page,
};
use crate::infrastructure::rate_limit::RateLimitedControlClient;

/// Error codes the provider uses for rate limiting.
const THROTTLE_CODES: &[&str] = &["TooManyRequestsException", "ThrottlingException"];

/// Message fragments that indicate throttling when no code is available,
/// e.g. when the SDK retryer runs out of retry quota.
const THROTTLE_MESSAGES: &[&str] = &["Too Many Requests", "retry quota exceeded"];

/// Bad-request text for operations serverless clusters do not support.
const SERVERLESS_UNSUPPORTED: &str = "This operation cannot be performed on serverless clusters";

/// MSK and MSK Connect clients for one region.
pub struct MskControlPlane {
    region: String,
    kafka: aws_sdk_kafka::Client,
    connect: aws_sdk_kafkaconnect::Client,
}

impl MskControlPlane {
    /// Resolve credentials from the default provider chain. The SDK's
    /// standard retryer stays enabled underneath the rate limiter.
    pub async fn connect(region: &str) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .retry_config(RetryConfig::standard())
            .load()
            .await;

        debug!(region, "control plane clients initialized");

        Self {
            region: region.to_string(),
            kafka: aws_sdk_kafka::Client::new(&sdk_config),
            connect: aws_sdk_kafkaconnect::Client::new(&sdk_config),
        }
    }
}

/// Classify a provider error from its code and rendered text.
pub fn classify(code: Option<&str>, text: &str) -> ErrorClass {
    match code {
        Some(code) if THROTTLE_CODES.contains(&code) => return ErrorClass::Throttled,
        Some("NotFoundException") => return ErrorClass::NotFound,
        Some("BadRequestException") if text.contains(SERVERLESS_UNSUPPORTED) => {
            return ErrorClass::Unsupported
        }
        Some("ServiceUnavailableException" | "InternalServerErrorException") => {
            return ErrorClass::Transient
        }
        _ => {}
    }
    if THROTTLE_MESSAGES.iter().any(|fragment| text.contains(fragment)) {
        ErrorClass::Throttled
    } else {
        ErrorClass::Fatal
    }
}

fn sdk_error<E, R>(operation: &'static str, err: SdkError<E, R>) -> ControlPlaneError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let text = DisplayErrorContext(&err).to_string();
    let class = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => ErrorClass::Transient,
        _ => classify(err.code(), &text),
    };
    ControlPlaneError::new(operation, class, text)
}

fn cluster_description(cluster: &Cluster) -> ClusterDescription {
    let cluster_type = match cluster.cluster_type() {
        Some(MskClusterType::Serverless) => ClusterType::Serverless,
        _ => ClusterType::Provisioned,
    };

    let mut configuration = ClusterConfiguration {
        state: cluster.state().map(|s| s.as_str().to_string()),
        current_version: cluster.current_version().map(str::to_string),
        ..Default::default()
    };

    if let Some(provisioned) = cluster.provisioned() {
        configuration.number_of_broker_nodes = Option::from(provisioned.number_of_broker_nodes());
        configuration.kafka_version = provisioned
            .current_broker_software_info()
            .and_then(|info| info.kafka_version())
            .map(str::to_string);
        configuration.enhanced_monitoring = provisioned
            .enhanced_monitoring()
            .map(|m| m.as_str().to_string());

        let node_group: Option<&aws_sdk_kafka::types::BrokerNodeGroupInfo> =
            Option::from(provisioned.broker_node_group_info());
        if let Some(group) = node_group {
            let instance_type: Option<&str> = Option::from(group.instance_type());
            configuration.instance_type = instance_type.map(str::to_string);
            configuration.client_subnets = group.client_subnets().to_vec();
            configuration.security_groups = group.security_groups().to_vec();
        }

        if let Some(transit) = provisioned
            .encryption_info()
            .and_then(|e| e.encryption_in_transit())
        {
            configuration.client_broker_encryption =
                transit.client_broker().map(|b| b.as_str().to_string());
            configuration.in_cluster_encryption = transit.in_cluster();
        }

        if let Some(auth) = provisioned.client_authentication() {
            let sasl = auth.sasl();
            configuration.client_authentication = ClientAuthentication {
                unauthenticated: auth
                    .unauthenticated()
                    .and_then(|u| u.enabled())
                    .unwrap_or(false),
                iam: sasl
                    .and_then(|s| s.iam())
                    .and_then(|i| i.enabled())
                    .unwrap_or(false),
                sasl_scram: sasl
                    .and_then(|s| s.scram())
                    .and_then(|s| s.enabled())
                    .unwrap_or(false),
                tls: auth.tls().and_then(|t| t.enabled()).unwrap_or(false),
            };
        }
    }

    if let Some(serverless) = cluster.serverless() {
        configuration.client_broker_encryption = Some("TLS".to_string());
        configuration.client_authentication.iam = serverless
            .client_authentication()
            .and_then(|a| a.sasl())
            .and_then(|s| s.iam())
            .and_then(|i| i.enabled())
            .unwrap_or(false);
        for vpc in serverless.vpc_configs() {
            configuration
                .client_subnets
                .extend(vpc.subnet_ids().iter().cloned());
            configuration
                .security_groups
                .extend(vpc.security_group_ids().iter().cloned());
        }
    }

    ClusterDescription {
        name: cluster.cluster_name().unwrap_or_default().to_string(),
        arn: cluster.cluster_arn().unwrap_or_default().to_string(),
        cluster_type,
        configuration,
    }
}

#[async_trait]
impl ControlPlane for MskControlPlane {
    fn region(&self) -> &str {
        &self.region
    }

    async fn list_clusters(
        &self,
        next_token: Option<String>,
    ) -> ControlPlaneResult<Page<ClusterDescription>> {
        let output = self
            .kafka
            .list_clusters_v2()
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| sdk_error("ListClustersV2", e))?;

        Ok(Page {
            items: output
                .cluster_info_list()
                .iter()
                .map(cluster_description)
                .collect(),
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn describe_cluster(&self, arn: &str) -> ControlPlaneResult<ClusterDescription> {
        let output = self
            .kafka
            .describe_cluster_v2()
            .cluster_arn(arn)
            .send()
            .await
            .map_err(|e| sdk_error("DescribeClusterV2", e))?;

        output.cluster_info().map(cluster_description).ok_or_else(|| {
            ControlPlaneError::new(
                "DescribeClusterV2",
                ErrorClass::NotFound,
                format!("no cluster info returned for {arn}"),
            )
        })
    }

    async fn get_bootstrap_brokers(&self, arn: &str) -> ControlPlaneResult<BootstrapBrokers> {
        let output = self
            .kafka
            .get_bootstrap_brokers()
            .cluster_arn(arn)
            .send()
            .await
            .map_err(|e| sdk_error("GetBootstrapBrokers", e))?;

        Ok(BootstrapBrokers {
            plaintext: output.bootstrap_broker_string().map(str::to_string),
            tls: output.bootstrap_broker_string_tls().map(str::to_string),
            sasl_scram: output.bootstrap_broker_string_sasl_scram().map(str::to_string),
            sasl_iam: output.bootstrap_broker_string_sasl_iam().map(str::to_string),
        })
    }

    async fn list_nodes(
        &self,
        arn: &str,
        next_token: Option<String>,
    ) -> ControlPlaneResult<Page<BrokerNode>> {
        let output = self
            .kafka
            .list_nodes()
            .cluster_arn(arn)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| sdk_error("ListNodes", e))?;

        let items = output
            .node_info_list()
            .iter()
            .map(|node| {
                let broker = node.broker_node_info();
                BrokerNode {
                    broker_id: broker.and_then(|b| b.broker_id()).map(|id| id as i64),
                    instance_type: node.instance_type().map(str::to_string),
                    client_subnet: broker
                        .and_then(|b| b.client_subnet())
                        .map(str::to_string),
                    client_vpc_ip_address: broker
                        .and_then(|b| b.client_vpc_ip_address())
                        .map(str::to_string),
                    endpoints: broker.map(|b| b.endpoints().to_vec()).unwrap_or_default(),
                }
            })
            .collect();

        Ok(Page {
            items,
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn get_cluster_policy(&self, arn: &str) -> ControlPlaneResult<Option<String>> {
        match self
            .kafka
            .get_cluster_policy()
            .cluster_arn(arn)
            .send()
            .await
        {
            Ok(output) => Ok(output.policy().map(str::to_string)),
            Err(e) => {
                let err = sdk_error("GetClusterPolicy", e);
                if err.class() == ErrorClass::NotFound {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn get_compatible_versions(
        &self,
        arn: &str,
    ) -> ControlPlaneResult<Vec<CompatibleVersions>> {
        let output = self
            .kafka
            .get_compatible_kafka_versions()
            .cluster_arn(arn)
            .send()
            .await
            .map_err(|e| sdk_error("GetCompatibleKafkaVersions", e))?;

        Ok(output
            .compatible_kafka_versions()
            .iter()
            .map(|v| CompatibleVersions {
                source_version: v.source_version().map(str::to_string),
                target_versions: v.target_versions().to_vec(),
            })
            .collect())
    }

    async fn list_connectors(
        &self,
        next_token: Option<String>,
    ) -> ControlPlaneResult<Page<MskConnector>> {
        let output = self
            .connect
            .list_connectors()
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| sdk_error("ListConnectors", e))?;

        let items = output
            .connectors()
            .iter()
            .map(|c| MskConnector {
                name: c.connector_name().unwrap_or_default().to_string(),
                arn: c.connector_arn().map(str::to_string),
                state: c.connector_state().map(|s| s.as_str().to_string()),
                kafka_connect_version: c.kafka_connect_version().map(str::to_string),
                bootstrap_servers: c
                    .kafka_cluster()
                    .and_then(|k| k.apache_kafka_cluster())
                    .and_then(|a| a.bootstrap_servers())
                    .map(str::to_string),
            })
            .collect();

        Ok(Page {
            items,
            next_token: output.next_token().map(str::to_string),
        })
    }
}

/// Builds rate-limited [`MskControlPlane`] clients, one bucket per region.
pub struct MskControlPlaneFactory {
    config: ControlPlaneConfig,
    cancel: CancellationToken,
}

impl MskControlPlaneFactory {
    pub fn new(config: ControlPlaneConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }
}

#[async_trait]
impl ControlPlaneFactory for MskControlPlaneFactory {
    async fn for_region(&self, region: &str) -> Box<dyn ControlPlane> {
        let client = MskControlPlane::connect(region).await;
        Box::new(RateLimitedControlClient::new(
            client,
            &self.config,
            self.cancel.clone(),
        ))
    }
}
