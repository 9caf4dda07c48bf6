//! In-process broker speaking just enough of the protocol for admin tests.
//!
//! Serves ApiVersions, Metadata, DescribeConfigs and DescribeAcls from a
//! [`MockCluster`] and records the API key of every request it receives.

use std::sync::{Arc, Mutex};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use kafka_protocol::messages::api_versions_response::ApiVersion;
use kafka_protocol::messages::describe_acls_response::{AclDescription, DescribeAclsResource};
use kafka_protocol::messages::describe_configs_response::{
    DescribeConfigsResourceResult, DescribeConfigsResult,
};
use kafka_protocol::messages::metadata_response::{
    MetadataResponseBroker, MetadataResponsePartition, MetadataResponseTopic,
};
use kafka_protocol::messages::{
    ApiVersionsRequest, ApiVersionsResponse, BrokerId, DescribeAclsRequest, DescribeAclsResponse,
    DescribeConfigsRequest, DescribeConfigsResponse, MetadataRequest, MetadataResponse,
    RequestHeader, ResponseHeader, TopicName,
};
use kafka_protocol::protocol::{Decodable, Encodable, HeaderVersion, Request, StrBytes};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
pub(crate) struct MockTopic {
    pub name: String,
    /// Replica list per partition, in partition-index order.
    pub partitions: Vec<Vec<i32>>,
    pub configs: Vec<(String, Option<String>)>,
}

impl MockTopic {
    pub fn new(name: &str, partitions: usize, replicas: usize) -> Self {
        Self {
            name: name.to_string(),
            partitions: (0..partitions)
                .map(|_| (1..=replicas as i32).collect())
                .collect(),
            configs: vec![("cleanup.policy".to_string(), Some("delete".to_string()))],
        }
    }

    pub fn with_config(mut self, key: &str, value: Option<&str>) -> Self {
        self.configs
            .push((key.to_string(), value.map(str::to_string)));
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MockAcl {
    pub resource_type: i8,
    pub resource_name: String,
    pub pattern_type: i8,
    pub principal: String,
    pub host: String,
    pub operation: i8,
    pub permission_type: i8,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MockCluster {
    pub cluster_id: String,
    /// `None` advertises this broker as controller; `Some(-1)` reports no
    /// controller.
    pub controller_id: Option<i32>,
    pub topics: Vec<MockTopic>,
    pub acls: Vec<MockAcl>,
    pub acl_error: Option<(i16, String)>,
    /// Topic whose DescribeConfigs result carries this error code.
    pub config_error: Option<(String, i16)>,
    /// Number of Metadata responses that report LEADER_NOT_AVAILABLE first.
    pub transient_metadata_errors: usize,
}

pub(crate) struct MockBroker {
    pub address: String,
    cluster: Arc<Mutex<MockCluster>>,
    requests: Arc<Mutex<Vec<i16>>>,
}

const BROKER_NODE_ID: i32 = 1;

impl MockBroker {
    pub async fn start(cluster: MockCluster) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let port = listener.local_addr().unwrap().port();
        let cluster = Arc::new(Mutex::new(cluster));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let accept_cluster = cluster.clone();
        let accept_requests = requests.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let cluster = accept_cluster.clone();
                let requests = accept_requests.clone();
                tokio::spawn(async move {
                    serve(stream, port, cluster, requests).await;
                });
            }
        });

        Self {
            address,
            cluster,
            requests,
        }
    }

    pub fn requests_for(&self, api_key: i16) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|key| **key == api_key)
            .count()
    }

    pub fn update(&self, change: impl FnOnce(&mut MockCluster)) {
        change(&mut self.cluster.lock().unwrap());
    }
}

async fn serve(
    mut stream: TcpStream,
    port: u16,
    cluster: Arc<Mutex<MockCluster>>,
    requests: Arc<Mutex<Vec<i16>>>,
) {
    loop {
        let mut len_buf = [0u8; 4];
        if stream.read_exact(&mut len_buf).await.is_err() {
            return;
        }
        let mut body = vec![0u8; u32::from_be_bytes(len_buf) as usize];
        if stream.read_exact(&mut body).await.is_err() {
            return;
        }
        let mut body = Bytes::from(body);
        let mut peek = body.clone();
        let api_key = peek.get_i16();
        let version = peek.get_i16();
        requests.lock().unwrap().push(api_key);

        let response = {
            let mut cluster = cluster.lock().unwrap();
            match api_key {
                k if k == ApiVersionsRequest::KEY => {
                    let (header, _) = decode::<ApiVersionsRequest>(&mut body, version);
                    encode(header.correlation_id, version, &api_versions())
                }
                k if k == MetadataRequest::KEY => {
                    let (header, _) = decode::<MetadataRequest>(&mut body, version);
                    encode(header.correlation_id, version, &metadata(&mut cluster, port))
                }
                k if k == DescribeConfigsRequest::KEY => {
                    let (header, request) = decode::<DescribeConfigsRequest>(&mut body, version);
                    encode(header.correlation_id, version, &configs(&cluster, &request))
                }
                k if k == DescribeAclsRequest::KEY => {
                    let (header, _) = decode::<DescribeAclsRequest>(&mut body, version);
                    encode(header.correlation_id, version, &acls(&cluster))
                }
                _ => return,
            }
        };

        let mut framed = BytesMut::new();
        framed.put_u32(response.len() as u32);
        framed.extend_from_slice(&response);
        if stream.write_all(&framed).await.is_err() {
            return;
        }
    }
}

fn decode<R: Request>(body: &mut Bytes, version: i16) -> (RequestHeader, R) {
    let header = RequestHeader::decode(body, R::header_version(version)).unwrap();
    let request = R::decode(body, version).unwrap();
    (header, request)
}

fn encode<M: Encodable + HeaderVersion>(correlation_id: i32, version: i16, message: &M) -> BytesMut {
    let mut buf = BytesMut::new();
    ResponseHeader::default()
        .with_correlation_id(correlation_id)
        .encode(&mut buf, M::header_version(version))
        .unwrap();
    message.encode(&mut buf, version).unwrap();
    buf
}

fn api_versions() -> ApiVersionsResponse {
    let supported = [
        (ApiVersionsRequest::KEY, 0, 3),
        (MetadataRequest::KEY, 1, 9),
        (DescribeConfigsRequest::KEY, 0, 4),
        (DescribeAclsRequest::KEY, 0, 3),
    ];
    ApiVersionsResponse::default().with_api_keys(
        supported
            .iter()
            .map(|(key, min, max)| {
                ApiVersion::default()
                    .with_api_key(*key)
                    .with_min_version(*min)
                    .with_max_version(*max)
            })
            .collect(),
    )
}

fn metadata(cluster: &mut MockCluster, port: u16) -> MetadataResponse {
    let transient = cluster.transient_metadata_errors > 0;
    if transient {
        cluster.transient_metadata_errors -= 1;
    }

    let topics = cluster
        .topics
        .iter()
        .enumerate()
        .map(|(i, topic)| {
            MetadataResponseTopic::default()
                .with_name(Some(TopicName(StrBytes::from_string(topic.name.clone()))))
                // LEADER_NOT_AVAILABLE
                .with_error_code(if transient && i == 0 { 5 } else { 0 })
                .with_partitions(
                    topic
                        .partitions
                        .iter()
                        .enumerate()
                        .map(|(index, replicas)| {
                            MetadataResponsePartition::default()
                                .with_partition_index(index as i32)
                                .with_leader_id(BrokerId(BROKER_NODE_ID))
                                .with_replica_nodes(replicas.iter().map(|r| BrokerId(*r)).collect())
                        })
                        .collect(),
                )
        })
        .collect();

    MetadataResponse::default()
        .with_brokers(vec![MetadataResponseBroker::default()
            .with_node_id(BrokerId(BROKER_NODE_ID))
            .with_host(StrBytes::from_static_str("127.0.0.1"))
            .with_port(i32::from(port))])
        .with_cluster_id(Some(StrBytes::from_string(cluster.cluster_id.clone())))
        .with_controller_id(BrokerId(cluster.controller_id.unwrap_or(BROKER_NODE_ID)))
        .with_topics(topics)
}

fn configs(cluster: &MockCluster, request: &DescribeConfigsRequest) -> DescribeConfigsResponse {
    let results = request
        .resources
        .iter()
        .map(|resource| {
            let name = resource.resource_name.to_string();
            let error_code = match &cluster.config_error {
                Some((topic, code)) if *topic == name => *code,
                _ => 0,
            };
            let configs = cluster
                .topics
                .iter()
                .find(|t| t.name == name)
                .map(|t| {
                    t.configs
                        .iter()
                        .map(|(key, value)| {
                            DescribeConfigsResourceResult::default()
                                .with_name(StrBytes::from_string(key.clone()))
                                .with_value(value.clone().map(StrBytes::from_string))
                        })
                        .collect()
                })
                .unwrap_or_default();
            DescribeConfigsResult::default()
                .with_error_code(error_code)
                .with_resource_type(resource.resource_type)
                .with_resource_name(resource.resource_name.clone())
                .with_configs(configs)
        })
        .collect();
    DescribeConfigsResponse::default().with_results(results)
}

fn acls(cluster: &MockCluster) -> DescribeAclsResponse {
    if let Some((code, message)) = &cluster.acl_error {
        return DescribeAclsResponse::default()
            .with_error_code(*code)
            .with_error_message(Some(StrBytes::from_string(message.clone())));
    }
    DescribeAclsResponse::default().with_resources(
        cluster
            .acls
            .iter()
            .map(|acl| {
                DescribeAclsResource::default()
                    .with_resource_type(acl.resource_type)
                    .with_resource_name(StrBytes::from_string(acl.resource_name.clone()))
                    .with_pattern_type(acl.pattern_type)
                    .with_acls(vec![AclDescription::default()
                        .with_principal(StrBytes::from_string(acl.principal.clone()))
                        .with_host(StrBytes::from_string(acl.host.clone()))
                        .with_operation(acl.operation)
                        .with_permission_type(acl.permission_type)])
            })
            .collect(),
    )
}
