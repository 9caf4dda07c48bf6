use serde::{Deserialize, Serialize};

use crate::domain::acl::Acl;
use crate::domain::auth::{AuthCapabilities, AuthMethod};
use crate::domain::connector::SelfManagedConnectors;
use crate::domain::topic::Topics;

/// The aggregate persisted between discover and scan invocations.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct State {
    #[serde(default)]
    pub regions: Vec<Region>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Region {
    pub name: String,
    #[serde(default)]
    pub clusters: Vec<DiscoveredCluster>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterType {
    #[default]
    Provisioned,
    Serverless,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct DiscoveredCluster {
    pub name: String,
    pub arn: String,
    pub region: String,
    #[serde(default)]
    pub cluster_type: ClusterType,
    #[serde(default)]
    pub configuration: ClusterConfiguration,
    #[serde(rename = "AWSClientInformation", default)]
    pub aws_client_information: AwsClientInformation,
    #[serde(rename = "KafkaAdminClientInformation", default)]
    pub kafka_admin_client_information: KafkaAdminClientInformation,
}

/// Client authentication switches from the control plane.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ClientAuthentication {
    pub unauthenticated: bool,
    #[serde(rename = "IAM")]
    pub iam: bool,
    #[serde(rename = "SASLSCRAM")]
    pub sasl_scram: bool,
    #[serde(rename = "TLS")]
    pub tls: bool,
}

/// The slice of the control-plane cluster description kept in state.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterConfiguration {
    pub state: Option<String>,
    pub current_version: Option<String>,
    pub kafka_version: Option<String>,
    pub number_of_broker_nodes: Option<i32>,
    pub instance_type: Option<String>,
    #[serde(default)]
    pub client_subnets: Vec<String>,
    #[serde(default)]
    pub security_groups: Vec<String>,
    /// `TLS`, `TLS_PLAINTEXT` or `PLAINTEXT`.
    pub client_broker_encryption: Option<String>,
    pub in_cluster_encryption: Option<bool>,
    pub enhanced_monitoring: Option<String>,
    #[serde(default)]
    pub client_authentication: ClientAuthentication,
}

impl ClusterConfiguration {
    fn client_broker(&self) -> &str {
        // MSK defaults to TLS-only when encryption info is absent.
        self.client_broker_encryption.as_deref().unwrap_or("TLS")
    }

    pub fn allows_tls_clients(&self) -> bool {
        matches!(self.client_broker(), "TLS" | "TLS_PLAINTEXT")
    }

    pub fn allows_plaintext_clients(&self) -> bool {
        matches!(self.client_broker(), "PLAINTEXT" | "TLS_PLAINTEXT")
    }

    /// Whether the broker listener for `method` encrypts in transit.
    pub fn transport_encryption(&self, method: AuthMethod) -> bool {
        match method {
            AuthMethod::UnauthenticatedPlaintext => false,
            AuthMethod::UnauthenticatedTls => true,
            AuthMethod::Iam | AuthMethod::SaslScram | AuthMethod::Tls => {
                self.allows_tls_clients()
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct BootstrapBrokers {
    pub plaintext: Option<String>,
    pub tls: Option<String>,
    pub sasl_scram: Option<String>,
    pub sasl_iam: Option<String>,
}

impl BootstrapBrokers {
    /// Comma separated broker list for the listener serving `method`.
    pub fn for_method(&self, method: AuthMethod) -> Option<&str> {
        let brokers = match method {
            AuthMethod::UnauthenticatedPlaintext => self.plaintext.as_deref(),
            AuthMethod::UnauthenticatedTls | AuthMethod::Tls => self.tls.as_deref(),
            AuthMethod::Iam => self.sasl_iam.as_deref(),
            AuthMethod::SaslScram => self.sasl_scram.as_deref(),
        };
        brokers.filter(|b| !b.trim().is_empty())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct BrokerNode {
    pub broker_id: Option<i64>,
    pub instance_type: Option<String>,
    pub client_subnet: Option<String>,
    pub client_vpc_ip_address: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct CompatibleVersions {
    pub source_version: Option<String>,
    #[serde(default)]
    pub target_versions: Vec<String>,
}

/// An MSK Connect connector attached to the cluster.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct MskConnector {
    pub name: String,
    pub arn: Option<String>,
    pub state: Option<String>,
    pub kafka_connect_version: Option<String>,
    pub bootstrap_servers: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct AwsClientInformation {
    #[serde(default)]
    pub bootstrap_brokers: BootstrapBrokers,
    #[serde(default)]
    pub nodes: Vec<BrokerNode>,
    pub policy: Option<String>,
    #[serde(default)]
    pub compatible_versions: Vec<CompatibleVersions>,
    #[serde(default)]
    pub connectors: Vec<MskConnector>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct KafkaAdminClientInformation {
    #[serde(rename = "ClusterID", default)]
    pub cluster_id: String,
    #[serde(default)]
    pub topics: Topics,
    #[serde(default)]
    pub acls: Vec<Acl>,
    #[serde(default)]
    pub self_managed_connectors: SelfManagedConnectors,
}

impl DiscoveredCluster {
    /// Identity within a region: the ARN, or the name for clusters without
    /// one.
    pub fn key(&self) -> &str {
        if self.arn.is_empty() {
            &self.name
        } else {
            &self.arn
        }
    }

    pub fn is_serverless(&self) -> bool {
        self.cluster_type == ClusterType::Serverless
    }

    pub fn auth_capabilities(&self) -> AuthCapabilities {
        let auth = &self.configuration.client_authentication;
        AuthCapabilities {
            unauthenticated_tls: auth.unauthenticated && self.configuration.allows_tls_clients(),
            unauthenticated_plaintext: auth.unauthenticated
                && self.configuration.allows_plaintext_clients(),
            iam: auth.iam,
            sasl_scram: auth.sasl_scram,
            tls: auth.tls,
            serverless: self.is_serverless(),
        }
    }
}

impl Region {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clusters: Vec::new(),
        }
    }

    pub fn cluster(&self, key: &str) -> Option<&DiscoveredCluster> {
        self.clusters.iter().find(|c| c.key() == key)
    }

    pub fn cluster_mut(&mut self, key: &str) -> Option<&mut DiscoveredCluster> {
        self.clusters.iter_mut().find(|c| c.key() == key)
    }

    /// Replace the cluster with the same key, or append it.
    pub fn upsert_cluster(&mut self, cluster: DiscoveredCluster) {
        match self.clusters.iter_mut().find(|c| c.key() == cluster.key()) {
            Some(existing) => *existing = cluster,
            None => self.clusters.push(cluster),
        }
    }
}

impl State {
    pub fn region(&self, name: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.name == name)
    }

    pub fn region_mut(&mut self, name: &str) -> Option<&mut Region> {
        self.regions.iter_mut().find(|r| r.name == name)
    }

    /// Replace the region with the same name, or append it. Other regions
    /// are not touched.
    pub fn upsert_region(&mut self, region: Region) {
        match self.regions.iter_mut().find(|r| r.name == region.name) {
            Some(existing) => *existing = region,
            None => self.regions.push(region),
        }
    }

    pub fn cluster_count(&self) -> usize {
        self.regions.iter().map(|r| r.clusters.len()).sum()
    }
}
