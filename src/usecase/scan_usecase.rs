//! Broker-side scan of every discovered cluster.

use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::domain::auth::SelectedAuth;
use crate::domain::cluster::{DiscoveredCluster, KafkaAdminClientInformation, State};
use crate::error::{AuthError, ErrorClass, ScanError};
use crate::infrastructure::kafka::{AdminConnector, ClusterAdmin, ConnectionTarget};
use crate::infrastructure::persistence::credentials_store::Credentials;
use crate::infrastructure::persistence::keyring_secret_repository::SecretRepository;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub scanned: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Walks regions and clusters in order, scanning one cluster at a time.
pub struct ClusterScanOrchestrator<'a> {
    connector: &'a dyn AdminConnector,
    secrets: Option<&'a dyn SecretRepository>,
    cancel: CancellationToken,
}

impl<'a> ClusterScanOrchestrator<'a> {
    pub fn new(connector: &'a dyn AdminConnector, cancel: CancellationToken) -> Self {
        Self {
            connector,
            secrets: None,
            cancel,
        }
    }

    /// Fall back to `secrets` for SCRAM passwords left empty in the
    /// credentials file.
    pub fn with_secrets(mut self, secrets: &'a dyn SecretRepository) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Scan the clusters of `regions` (all regions when empty) and write the
    /// results into `state`. A failing cluster keeps its previous results.
    pub async fn scan(
        &self,
        state: &mut State,
        credentials: &Credentials,
        regions: &[String],
    ) -> ScanReport {
        let mut report = ScanReport::default();

        for wanted in regions {
            if state.region(wanted).is_none() {
                warn!(region = %wanted, "region has not been discovered, skipping");
            }
        }

        'regions: for region in state
            .regions
            .iter_mut()
            .filter(|r| regions.is_empty() || regions.contains(&r.name))
        {
            let keys: Vec<String> = region.clusters.iter().map(|c| c.key().to_string()).collect();
            for key in keys {
                if self.cancel.is_cancelled() {
                    report.cancelled = true;
                    break 'regions;
                }
                let Some(cluster) = region.cluster(&key) else {
                    continue;
                };

                match self.scan_cluster(&region.name, cluster, credentials).await {
                    Ok(information) => {
                        if let Some(cluster) = region.cluster_mut(&key) {
                            cluster.kafka_admin_client_information = information;
                        }
                        report.scanned += 1;
                    }
                    Err(e) => {
                        error!(
                            region = %region.name,
                            cluster = %key,
                            class = ?e.class(),
                            error = %e,
                            "cluster scan failed, skipping"
                        );
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            scanned = report.scanned,
            failed = report.failed,
            cancelled = report.cancelled,
            "scan finished"
        );
        report
    }

    #[instrument(skip_all, fields(region = %region, cluster = %cluster.name))]
    async fn scan_cluster(
        &self,
        region: &str,
        cluster: &DiscoveredCluster,
        credentials: &Credentials,
    ) -> Result<KafkaAdminClientInformation, ScanError> {
        let auth = self.resolve_secrets(
            &cluster.arn,
            credentials.entry(region, &cluster.arn)?.selected()?,
        )?;
        let method = auth.method();

        let bootstrap = cluster
            .aws_client_information
            .bootstrap_brokers
            .for_method(method)
            .map(ConnectionTarget::parse_bootstrap)
            .filter(|brokers| !brokers.is_empty())
            .ok_or(ScanError::MissingBootstrap {
                method: method.as_str(),
            })?;

        let target = ConnectionTarget {
            region: region.to_string(),
            cluster_name: cluster.name.clone(),
            bootstrap,
            tls: cluster.configuration.transport_encryption(method),
            auth,
        };

        let mut admin = self.connector.connect(&target).await?;
        let result = collect(admin.as_mut(), cluster).await;
        admin.close().await;
        result
    }

    fn resolve_secrets(&self, cluster_arn: &str, auth: SelectedAuth) -> Result<SelectedAuth, AuthError> {
        match auth {
            SelectedAuth::SaslScram { username, password } if password.is_empty() => {
                let stored = match self.secrets {
                    Some(secrets) => secrets.get_password(cluster_arn).unwrap_or_else(|e| {
                        warn!(error = %e, "keyring lookup failed");
                        None
                    }),
                    None => None,
                };
                match stored {
                    Some(password) => Ok(SelectedAuth::SaslScram { username, password }),
                    None => Err(AuthError::MissingSecret {
                        method: "sasl_scram",
                        field: "password",
                    }),
                }
            }
            other => Ok(other),
        }
    }
}

async fn collect(
    admin: &mut dyn ClusterAdmin,
    cluster: &DiscoveredCluster,
) -> Result<KafkaAdminClientInformation, ScanError> {
    let metadata = admin.fetch_metadata().await?;

    let acls = if cluster.is_serverless() {
        warn!("ACLs are not available on serverless clusters, skipping");
        Vec::new()
    } else {
        match admin.describe_acls().await {
            Ok(acls) => acls,
            Err(e) if e.class() == ErrorClass::Unsupported => {
                warn!(error = %e, "cluster does not support ACL queries, skipping");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        }
    };

    let self_managed_connectors = match admin.scan_connectors(&metadata.topics).await {
        Ok(connectors) => connectors,
        Err(e) => {
            warn!(error = %e, "connector scan failed, continuing without connectors");
            Default::default()
        }
    };

    info!(
        topics = metadata.topics.details.len(),
        acls = acls.len(),
        connectors = self_managed_connectors.connectors.len(),
        "cluster scanned"
    );

    Ok(KafkaAdminClientInformation {
        cluster_id: metadata.cluster_id,
        topics: metadata.topics,
        acls,
        self_managed_connectors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{KafkaResult, StoreResult};
    use async_trait::async_trait;

    struct NeverConnects;

    #[async_trait]
    impl AdminConnector for NeverConnects {
        async fn connect(&self, _target: &ConnectionTarget) -> KafkaResult<Box<dyn ClusterAdmin>> {
            unreachable!("secret resolution happens before connecting")
        }
    }

    struct OneSecret;

    impl SecretRepository for OneSecret {
        fn get_password(&self, cluster_arn: &str) -> StoreResult<Option<String>> {
            Ok((cluster_arn == "arn:known").then(|| "from-keyring".to_string()))
        }

        fn save_password(&self, _cluster_arn: &str, _password: &str) -> StoreResult<()> {
            Ok(())
        }

        fn delete_password(&self, _cluster_arn: &str) -> StoreResult<()> {
            Ok(())
        }
    }

    fn scram(password: &str) -> SelectedAuth {
        SelectedAuth::SaslScram {
            username: "svc".to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn test_empty_password_falls_back_to_keyring() {
        let orchestrator =
            ClusterScanOrchestrator::new(&NeverConnects, CancellationToken::new()).with_secrets(&OneSecret);
        assert_eq!(
            orchestrator.resolve_secrets("arn:known", scram("")).unwrap(),
            scram("from-keyring")
        );
        assert_eq!(
            orchestrator.resolve_secrets("arn:known", scram("inline")).unwrap(),
            scram("inline")
        );
    }

    #[test]
    fn test_missing_password_everywhere_is_an_error() {
        let orchestrator =
            ClusterScanOrchestrator::new(&NeverConnects, CancellationToken::new()).with_secrets(&OneSecret);
        let err = orchestrator.resolve_secrets("arn:other", scram("")).unwrap_err();
        assert_eq!(
            err,
            AuthError::MissingSecret {
                method: "sasl_scram",
                field: "password"
            }
        );
    }
}
