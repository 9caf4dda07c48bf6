//! Control-plane discovery of every MSK cluster in a set of regions.

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::auth::ClusterAuthEntry;
use crate::domain::cluster::{
    AwsClientInformation, DiscoveredCluster, MskConnector, Region, State,
};
use crate::error::{ControlPlaneError, ControlPlaneResult, ErrorClass};
use crate::infrastructure::control_plane::{
    connector_targets_cluster, list_all_clusters, list_all_connectors, list_all_nodes,
    ClusterDescription, ControlPlane, ControlPlaneFactory,
};
use crate::infrastructure::persistence::credentials_store::Credentials;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub regions: usize,
    pub failed_regions: usize,
    pub clusters: usize,
    pub failed_clusters: usize,
    pub new_credentials: usize,
    pub cancelled: bool,
}

pub struct DiscoveryUsecase<'a> {
    control_planes: &'a dyn ControlPlaneFactory,
    cancel: CancellationToken,
}

impl<'a> DiscoveryUsecase<'a> {
    pub fn new(control_planes: &'a dyn ControlPlaneFactory, cancel: CancellationToken) -> Self {
        Self {
            control_planes,
            cancel,
        }
    }

    /// Discover `regions` into `state` and add credential slots for new
    /// clusters. Failures skip the affected region or cluster only.
    pub async fn discover(
        &self,
        regions: &[String],
        state: &mut State,
        credentials: &mut Credentials,
    ) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();

        for region_name in regions {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let control_plane = self.control_planes.for_region(region_name).await;
            match self
                .discover_region(control_plane.as_ref(), state, credentials, &mut report)
                .await
            {
                Ok(()) => report.regions += 1,
                Err(e) if e.is_cancelled() => {
                    report.cancelled = true;
                    break;
                }
                Err(e) => {
                    error!(region = %region_name, error = %e, "region discovery failed, skipping");
                    report.failed_regions += 1;
                }
            }
        }

        info!(
            regions = report.regions,
            clusters = report.clusters,
            failed_clusters = report.failed_clusters,
            new_credentials = report.new_credentials,
            "discovery finished"
        );
        report
    }

    #[instrument(skip_all, fields(region = control_plane.region()))]
    async fn discover_region(
        &self,
        control_plane: &dyn ControlPlane,
        state: &mut State,
        credentials: &mut Credentials,
        report: &mut DiscoveryReport,
    ) -> ControlPlaneResult<()> {
        let region_name = control_plane.region().to_string();
        let summaries = list_all_clusters(control_plane).await?;
        info!(clusters = summaries.len(), "listed clusters");

        let connectors = match list_all_connectors(control_plane).await {
            Ok(connectors) => connectors,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(error = %e, "could not list MSK Connect connectors");
                Vec::new()
            }
        };

        let mut region = state
            .region(&region_name)
            .cloned()
            .unwrap_or_else(|| Region::new(region_name.clone()));

        let mut new_entries = Vec::new();
        for summary in summaries {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match discover_cluster(control_plane, &summary, &connectors).await {
                Ok(mut cluster) => {
                    if let Some(existing) = region.cluster(cluster.key()) {
                        cluster.kafka_admin_client_information =
                            existing.kafka_admin_client_information.clone();
                    }
                    new_entries.push(ClusterAuthEntry::from_capabilities(
                        &region_name,
                        &cluster.arn,
                        &cluster.auth_capabilities(),
                    ));
                    region.upsert_cluster(cluster);
                    report.clusters += 1;
                }
                Err(e) if e.is_cancelled() => {
                    report.cancelled = true;
                    break;
                }
                Err(e) => {
                    error!(cluster = %summary.name, error = %e, "cluster discovery failed, skipping");
                    report.failed_clusters += 1;
                }
            }
        }

        report.new_credentials += credentials.merge(new_entries);
        state.upsert_region(region);
        Ok(())
    }
}

/// Treat `Unsupported` as "nothing to report" for optional lookups.
fn optional<T: Default>(operation: &str, result: ControlPlaneResult<T>) -> ControlPlaneResult<T> {
    match result {
        Err(e) if e.class() == ErrorClass::Unsupported => {
            debug!(operation, error = %e, "not supported for this cluster");
            Ok(T::default())
        }
        other => other,
    }
}

#[instrument(skip_all, fields(cluster = %summary.name))]
async fn discover_cluster(
    control_plane: &dyn ControlPlane,
    summary: &ClusterDescription,
    connectors: &[MskConnector],
) -> Result<DiscoveredCluster, ControlPlaneError> {
    let description = control_plane.describe_cluster(&summary.arn).await?;
    let bootstrap_brokers = control_plane.get_bootstrap_brokers(&summary.arn).await?;
    let nodes = optional("ListNodes", list_all_nodes(control_plane, &summary.arn).await)?;
    let policy = control_plane.get_cluster_policy(&summary.arn).await?;
    let compatible_versions = optional(
        "GetCompatibleKafkaVersions",
        control_plane.get_compatible_versions(&summary.arn).await,
    )?;

    let connectors: Vec<MskConnector> = connectors
        .iter()
        .filter(|c| connector_targets_cluster(c, &bootstrap_brokers))
        .cloned()
        .collect();

    debug!(
        nodes = nodes.len(),
        connectors = connectors.len(),
        has_policy = policy.is_some(),
        "described cluster"
    );

    Ok(DiscoveredCluster {
        name: description.name,
        arn: description.arn,
        region: control_plane.region().to_string(),
        cluster_type: description.cluster_type,
        configuration: description.configuration,
        aws_client_information: AwsClientInformation {
            bootstrap_brokers,
            nodes,
            policy,
            compatible_versions,
            connectors,
        },
        kafka_admin_client_information: Default::default(),
    })
}
