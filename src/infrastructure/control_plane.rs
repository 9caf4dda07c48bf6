//! Cloud control-plane seam.
//!
//! [`ControlPlane`] is the narrow set of MSK / MSK Connect calls discovery
//! needs, expressed in domain types. The AWS SDK adapter lives in
//! [`super::msk`]; admission control and throttle retry wrap any
//! implementation in [`super::rate_limit`].

use async_trait::async_trait;

use crate::domain::cluster::{
    BootstrapBrokers, BrokerNode, ClusterConfiguration, ClusterType, CompatibleVersions,
    MskConnector,
};
use crate::error::ControlPlaneResult;

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_token: None,
        }
    }
}

/// Cluster identity plus the configuration slice kept in state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterDescription {
    pub name: String,
    pub arn: String,
    pub cluster_type: ClusterType,
    pub configuration: ClusterConfiguration,
}

#[async_trait]
pub trait ControlPlane: Send + Sync {
    fn region(&self) -> &str;

    async fn list_clusters(
        &self,
        next_token: Option<String>,
    ) -> ControlPlaneResult<Page<ClusterDescription>>;

    async fn describe_cluster(&self, arn: &str) -> ControlPlaneResult<ClusterDescription>;

    async fn get_bootstrap_brokers(&self, arn: &str) -> ControlPlaneResult<BootstrapBrokers>;

    async fn list_nodes(
        &self,
        arn: &str,
        next_token: Option<String>,
    ) -> ControlPlaneResult<Page<BrokerNode>>;

    /// `None` when the cluster has no resource policy.
    async fn get_cluster_policy(&self, arn: &str) -> ControlPlaneResult<Option<String>>;

    async fn get_compatible_versions(&self, arn: &str)
        -> ControlPlaneResult<Vec<CompatibleVersions>>;

    /// MSK Connect connectors in the region, across all clusters.
    async fn list_connectors(
        &self,
        next_token: Option<String>,
    ) -> ControlPlaneResult<Page<MskConnector>>;
}

/// Builds a region-scoped [`ControlPlane`].
#[async_trait]
pub trait ControlPlaneFactory: Send + Sync {
    async fn for_region(&self, region: &str) -> Box<dyn ControlPlane>;
}

pub async fn list_all_clusters(
    control_plane: &dyn ControlPlane,
) -> ControlPlaneResult<Vec<ClusterDescription>> {
    let mut clusters = Vec::new();
    let mut next_token = None;
    loop {
        let page = control_plane.list_clusters(next_token).await?;
        clusters.extend(page.items);
        match page.next_token {
            Some(token) if !token.is_empty() => next_token = Some(token),
            _ => return Ok(clusters),
        }
    }
}

pub async fn list_all_nodes(
    control_plane: &dyn ControlPlane,
    arn: &str,
) -> ControlPlaneResult<Vec<BrokerNode>> {
    let mut nodes = Vec::new();
    let mut next_token = None;
    loop {
        let page = control_plane.list_nodes(arn, next_token).await?;
        nodes.extend(page.items);
        match page.next_token {
            Some(token) if !token.is_empty() => next_token = Some(token),
            _ => return Ok(nodes),
        }
    }
}

pub async fn list_all_connectors(
    control_plane: &dyn ControlPlane,
) -> ControlPlaneResult<Vec<MskConnector>> {
    let mut connectors = Vec::new();
    let mut next_token = None;
    loop {
        let page = control_plane.list_connectors(next_token).await?;
        connectors.extend(page.items);
        match page.next_token {
            Some(token) if !token.is_empty() => next_token = Some(token),
            _ => return Ok(connectors),
        }
    }
}

/// Whether an MSK Connect connector's bootstrap string points at one of the
/// cluster's brokers.
pub fn connector_targets_cluster(connector: &MskConnector, brokers: &BootstrapBrokers) -> bool {
    let Some(servers) = connector.bootstrap_servers.as_deref() else {
        return false;
    };
    let cluster_hosts: Vec<&str> = [
        brokers.plaintext.as_deref(),
        brokers.tls.as_deref(),
        brokers.sasl_scram.as_deref(),
        brokers.sasl_iam.as_deref(),
    ]
    .into_iter()
    .flatten()
    .flat_map(|list| list.split(','))
    .filter_map(host_of)
    .collect();

    servers
        .split(',')
        .filter_map(host_of)
        .any(|host| cluster_hosts.contains(&host))
}

fn host_of(address: &str) -> Option<&str> {
    let address = address.trim();
    if address.is_empty() {
        return None;
    }
    Some(address.rsplit_once(':').map_or(address, |(host, _)| host))
}
