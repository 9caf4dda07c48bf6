//! Broker-facing side of a cluster scan.
//!
//! Admin requests (metadata, configs, ACLs) travel over [`session`]
//! connections; connector topics are read with an rdkafka consumer. Both
//! are built from the same [`ConnectionTarget`].

pub mod acl;
pub mod iam;
pub mod metadata;
#[cfg(test)]
pub(crate) mod mock_broker;
pub mod sasl;
pub mod scanner;
pub mod session;
pub mod stream;
pub mod tls;

use std::sync::Arc;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use tracing::{debug, info, instrument};

use crate::config::{NetworkConfig, ScanConfig};
use crate::domain::acl::Acl;
use crate::domain::auth::{AuthMethod, SelectedAuth};
use crate::domain::connector::SelfManagedConnectors;
use crate::domain::topic::Topics;
use crate::error::KafkaResult;

use self::iam::{MskIamTokenSource, ScanContext, TokenSource};
use self::metadata::{BatchedMetadataFetcher, ClusterMetadata};
use self::scanner::{ConsumerPartitionSource, PartitionScanner, PartitionSource};
use self::session::{AdminSession, SaslCredentials, SessionConnector, Transport};
use self::tls::{ClientIdentity, TlsConnector};

/// Where and how to reach one cluster's brokers.
#[derive(Debug, Clone)]
pub struct ConnectionTarget {
    pub region: String,
    pub cluster_name: String,
    pub bootstrap: Vec<String>,
    /// Transport encryption for the unauthenticated listeners. SASL and
    /// mTLS always use TLS.
    pub tls: bool,
    pub auth: SelectedAuth,
}

impl ConnectionTarget {
    /// Split a comma separated broker string.
    pub fn parse_bootstrap(brokers: &str) -> Vec<String> {
        brokers
            .split(',')
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn uses_tls(&self) -> bool {
        match self.auth.method() {
            AuthMethod::Iam | AuthMethod::SaslScram | AuthMethod::Tls => true,
            AuthMethod::UnauthenticatedTls | AuthMethod::UnauthenticatedPlaintext => self.tls,
        }
    }
}

/// An open admin connection to one cluster. Callers must `close` it on
/// every path.
#[async_trait]
pub trait ClusterAdmin: Send {
    async fn fetch_metadata(&mut self) -> KafkaResult<ClusterMetadata>;

    async fn describe_acls(&mut self) -> KafkaResult<Vec<Acl>>;

    async fn scan_connectors(&mut self, topics: &Topics) -> KafkaResult<SelfManagedConnectors>;

    async fn close(&mut self);
}

#[async_trait]
pub trait AdminConnector: Send + Sync {
    async fn connect(&self, target: &ConnectionTarget) -> KafkaResult<Box<dyn ClusterAdmin>>;
}

/// Builds admin connections with shared network settings.
pub struct AdminConnectionFactory {
    network: NetworkConfig,
    scan: ScanConfig,
}

impl AdminConnectionFactory {
    pub fn new(network: NetworkConfig, scan: ScanConfig) -> Self {
        Self { network, scan }
    }

    fn token_source(target: &ConnectionTarget) -> Option<Arc<dyn TokenSource>> {
        match target.auth {
            SelectedAuth::Iam => Some(Arc::new(MskIamTokenSource::new(target.region.clone()))),
            _ => None,
        }
    }

    /// TLS material is loaded here, before any socket is opened.
    fn session_connector(
        &self,
        target: &ConnectionTarget,
        token_source: Option<Arc<dyn TokenSource>>,
    ) -> KafkaResult<SessionConnector> {
        let transport = match &target.auth {
            SelectedAuth::Tls {
                ca_cert,
                client_cert,
                private_key,
            } => Transport::Tls(Arc::new(TlsConnector::new(
                ca_cert.as_deref(),
                Some(ClientIdentity {
                    client_cert,
                    private_key,
                }),
            )?)),
            _ if target.uses_tls() => Transport::Tls(Arc::new(TlsConnector::new(None, None)?)),
            _ => Transport::Plain,
        };

        let sasl = match (&target.auth, token_source) {
            (SelectedAuth::SaslScram { username, password }, _) => SaslCredentials::Scram {
                username: username.clone(),
                password: password.clone(),
            },
            (SelectedAuth::Iam, Some(source)) => SaslCredentials::OAuthBearer(source),
            _ => SaslCredentials::None,
        };

        Ok(SessionConnector::new(transport, sasl, &self.network))
    }

    /// librdkafka settings for the connector-topic consumer.
    pub fn consumer_config(&self, target: &ConnectionTarget) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", target.bootstrap.join(","))
            .set("client.id", &self.network.client_id)
            .set(
                "socket.connection.setup.timeout.ms",
                self.network.connect_timeout_ms.to_string(),
            )
            .set("socket.timeout.ms", self.network.request_timeout_ms.to_string())
            .set("socket.keepalive.enable", "true")
            .set(
                "retry.backoff.ms",
                self.network.metadata_retry_backoff_ms.to_string(),
            );

        match &target.auth {
            SelectedAuth::UnauthenticatedPlaintext | SelectedAuth::UnauthenticatedTls => {
                let protocol = if target.uses_tls() { "ssl" } else { "plaintext" };
                config.set("security.protocol", protocol);
            }
            SelectedAuth::Iam => {
                config.set("security.protocol", "sasl_ssl");
                config.set("sasl.mechanism", sasl::OAUTHBEARER);
            }
            SelectedAuth::SaslScram { username, password } => {
                config.set("security.protocol", "sasl_ssl");
                config.set("sasl.mechanism", sasl::SCRAM_SHA_512);
                config.set("sasl.username", username);
                config.set("sasl.password", password);
            }
            SelectedAuth::Tls {
                ca_cert,
                client_cert,
                private_key,
            } => {
                config.set("security.protocol", "ssl");
                if let Some(ca) = ca_cert {
                    config.set("ssl.ca.location", ca);
                }
                config.set("ssl.certificate.location", client_cert);
                config.set("ssl.key.location", private_key);
            }
        }
        config
    }
}

#[async_trait]
impl AdminConnector for AdminConnectionFactory {
    #[instrument(skip_all, fields(region = %target.region, cluster = %target.cluster_name, auth = %target.auth.method()))]
    async fn connect(&self, target: &ConnectionTarget) -> KafkaResult<Box<dyn ClusterAdmin>> {
        let token_source = Self::token_source(target);
        let connector = self.session_connector(target, token_source.clone())?;
        let session = connector.open_any(&target.bootstrap).await?;
        info!(broker = session.address(), "connected to cluster");

        Ok(Box::new(KafkaClusterAdmin {
            session,
            connector,
            network: self.network.clone(),
            scan: self.scan.clone(),
            consumer_config: self.consumer_config(target),
            token_source,
        }))
    }
}

/// [`ClusterAdmin`] over a live admin session.
pub struct KafkaClusterAdmin {
    session: AdminSession,
    connector: SessionConnector,
    network: NetworkConfig,
    scan: ScanConfig,
    consumer_config: ClientConfig,
    token_source: Option<Arc<dyn TokenSource>>,
}

#[async_trait]
impl ClusterAdmin for KafkaClusterAdmin {
    async fn fetch_metadata(&mut self) -> KafkaResult<ClusterMetadata> {
        BatchedMetadataFetcher::new(&self.connector, &self.network)
            .fetch(&mut self.session)
            .await
    }

    async fn describe_acls(&mut self) -> KafkaResult<Vec<Acl>> {
        acl::describe_acls(&mut self.session).await
    }

    async fn scan_connectors(&mut self, topics: &Topics) -> KafkaResult<SelfManagedConnectors> {
        if !topics.contains(&self.scan.connect_configs_topic) {
            debug!(topic = %self.scan.connect_configs_topic, "no connect configs topic");
            return Ok(SelfManagedConnectors::default());
        }

        let mut source = ConsumerPartitionSource::new(
            self.consumer_config.clone(),
            ScanContext::new(self.token_source.clone()),
            self.network.request_timeout(),
        )?;
        let result = PartitionScanner::new(&self.scan).scan(&mut source, topics).await;
        source.close().await;
        result
    }

    async fn close(&mut self) {
        self.session.close().await;
    }
}
