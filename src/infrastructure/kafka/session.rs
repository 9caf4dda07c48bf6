//! A single authenticated admin connection to one broker.
//!
//! Requests and responses are `kafka-protocol` messages; this module only
//! frames them, matches correlation IDs and enforces timeouts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use kafka_protocol::messages::{
    ApiVersionsRequest, RequestHeader, ResponseHeader, SaslAuthenticateRequest,
    SaslHandshakeRequest,
};
use kafka_protocol::protocol::{Decodable, Encodable, HeaderVersion, Message, Request, StrBytes};
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::config::NetworkConfig;
use crate::error::{KafkaError, KafkaResult};
use crate::infrastructure::kafka::iam::TokenSource;
use crate::infrastructure::kafka::sasl::{
    oauthbearer_initial_response, ScramClient, OAUTHBEARER, SCRAM_SHA_512,
};
use crate::infrastructure::kafka::stream::BrokerStream;
use crate::infrastructure::kafka::tls::TlsConnector;

const API_VERSIONS_VERSION: i16 = 2;
const SASL_HANDSHAKE_VERSION: i16 = 1;
const SASL_AUTHENTICATE_VERSION: i16 = 2;

/// Largest response frame accepted from a broker.
const MAX_FRAME_BYTES: usize = 100 * 1024 * 1024;

#[derive(Clone)]
pub enum Transport {
    Plain,
    Tls(Arc<TlsConnector>),
}

#[derive(Clone)]
pub enum SaslCredentials {
    None,
    Scram { username: String, password: String },
    OAuthBearer(Arc<dyn TokenSource>),
}

impl SaslCredentials {
    fn mechanism(&self) -> Option<&'static str> {
        match self {
            SaslCredentials::None => None,
            SaslCredentials::Scram { .. } => Some(SCRAM_SHA_512),
            SaslCredentials::OAuthBearer(_) => Some(OAUTHBEARER),
        }
    }
}

/// Everything needed to open sessions to any broker of one cluster.
#[derive(Clone)]
pub struct SessionConnector {
    transport: Transport,
    sasl: SaslCredentials,
    client_id: String,
    connect_timeout: Duration,
    request_timeout: Duration,
    keepalive: Duration,
}

impl SessionConnector {
    pub fn new(transport: Transport, sasl: SaslCredentials, network: &NetworkConfig) -> Self {
        Self {
            transport,
            sasl,
            client_id: network.client_id.clone(),
            connect_timeout: network.connect_timeout(),
            request_timeout: network.request_timeout(),
            keepalive: network.keepalive(),
        }
    }

    /// Connect, negotiate API versions and authenticate.
    #[instrument(skip(self), fields(tls = matches!(self.transport, Transport::Tls(_))))]
    pub async fn open(&self, address: &str) -> KafkaResult<AdminSession> {
        let tcp = match timeout(self.connect_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(KafkaError::Connect {
                    address: address.to_string(),
                    message: e.to_string(),
                })
            }
            Err(_) => {
                return Err(KafkaError::Timeout {
                    address: address.to_string(),
                })
            }
        };

        tcp.set_nodelay(true)?;
        SockRef::from(&tcp).set_tcp_keepalive(&TcpKeepalive::new().with_time(self.keepalive))?;

        let stream = match &self.transport {
            Transport::Plain => BrokerStream::Plain(tcp),
            Transport::Tls(connector) => {
                let host = server_name(address);
                let tls = timeout(self.connect_timeout, connector.connect(host, tcp))
                    .await
                    .map_err(|_| KafkaError::Timeout {
                        address: address.to_string(),
                    })??;
                BrokerStream::Tls(Box::new(tls))
            }
        };

        let mut session = AdminSession {
            address: address.to_string(),
            stream,
            correlation_id: 0,
            client_id: StrBytes::from_string(self.client_id.clone()),
            request_timeout: self.request_timeout,
            api_versions: HashMap::new(),
        };

        session.negotiate_versions().await?;
        session.authenticate(&self.sasl).await?;
        debug!(address, tls = session.stream.is_tls(), "admin session ready");
        Ok(session)
    }

    /// Try each bootstrap address in order, returning the first session
    /// that opens.
    pub async fn open_any(&self, bootstrap: &[String]) -> KafkaResult<AdminSession> {
        let mut last_error = None;
        for address in bootstrap {
            match self.open(address).await {
                Ok(session) => return Ok(session),
                Err(e) => {
                    warn!(address = %address, error = %e, "bootstrap broker unavailable");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            // Auth and TLS material errors repeat on every broker; report them as-is.
            Some(e @ (KafkaError::Sasl { .. } | KafkaError::TlsMaterial { .. })) => Err(e),
            _ => Err(KafkaError::NoBootstrap(bootstrap.to_vec())),
        }
    }
}

pub struct AdminSession {
    address: String,
    stream: BrokerStream,
    correlation_id: i32,
    client_id: StrBytes,
    request_timeout: Duration,
    /// api key -> (min, max) supported by the broker
    api_versions: HashMap<i16, (i16, i16)>,
}

impl AdminSession {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Highest version of `R` both sides support.
    pub fn version_for<R: Request>(&self, api: &'static str) -> KafkaResult<i16> {
        let client = R::VERSIONS;
        let unsupported = || KafkaError::UnsupportedVersion {
            api,
            client_min: client.min,
            client_max: client.max,
        };
        let (broker_min, broker_max) = *self.api_versions.get(&R::KEY).ok_or_else(unsupported)?;
        negotiate(client.min, client.max, broker_min, broker_max).ok_or_else(unsupported)
    }

    /// Send one request and decode its response.
    pub async fn send<R: Request>(&mut self, request: &R, version: i16) -> KafkaResult<R::Response> {
        let correlation_id = self.correlation_id;
        self.correlation_id = self.correlation_id.wrapping_add(1);

        let header = RequestHeader::default()
            .with_request_api_key(R::KEY)
            .with_request_api_version(version)
            .with_correlation_id(correlation_id)
            .with_client_id(Some(self.client_id.clone()));

        let mut body = BytesMut::new();
        header
            .encode(&mut body, R::header_version(version))
            .map_err(|e| KafkaError::Encode(format!("request header: {e}")))?;
        request
            .encode(&mut body, version)
            .map_err(|e| KafkaError::Encode(format!("api {} v{version}: {e}", R::KEY)))?;

        let mut frame = self.round_trip(&body).await?;

        let response_header =
            ResponseHeader::decode(&mut frame, <R::Response as HeaderVersion>::header_version(version))
                .map_err(|e| KafkaError::Decode(format!("response header: {e}")))?;
        if response_header.correlation_id != correlation_id {
            return Err(KafkaError::CorrelationIdMismatch {
                expected: correlation_id,
                actual: response_header.correlation_id,
            });
        }

        R::Response::decode(&mut frame, version)
            .map_err(|e| KafkaError::Decode(format!("api {} v{version}: {e}", R::KEY)))
    }

    async fn round_trip(&mut self, body: &[u8]) -> KafkaResult<Bytes> {
        let mut framed = BytesMut::with_capacity(4 + body.len());
        framed.put_u32(body.len() as u32);
        framed.extend_from_slice(body);

        let stream = &mut self.stream;
        let exchange = async {
            stream.write_all(&framed).await?;
            stream.flush().await?;

            let mut len_buf = [0u8; 4];
            stream.read_exact(&mut len_buf).await?;
            let len = u32::from_be_bytes(len_buf) as usize;
            if len > MAX_FRAME_BYTES {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("response frame of {len} bytes exceeds limit"),
                ));
            }
            let mut response = vec![0u8; len];
            stream.read_exact(&mut response).await?;
            Ok::<_, std::io::Error>(response)
        };

        match timeout(self.request_timeout, exchange).await {
            Ok(Ok(response)) => Ok(Bytes::from(response)),
            Ok(Err(e)) => Err(KafkaError::Io(e)),
            Err(_) => Err(KafkaError::Timeout {
                address: self.address.clone(),
            }),
        }
    }

    async fn negotiate_versions(&mut self) -> KafkaResult<()> {
        let response = self
            .send(&ApiVersionsRequest::default(), API_VERSIONS_VERSION)
            .await?;
        if response.error_code != 0 {
            return Err(KafkaError::Broker {
                operation: "ApiVersions",
                resource: self.address.clone(),
                code: response.error_code,
                message: String::new(),
            });
        }
        self.api_versions = response
            .api_keys
            .iter()
            .map(|api| (api.api_key, (api.min_version, api.max_version)))
            .collect();
        debug!(apis = self.api_versions.len(), "negotiated api versions");
        Ok(())
    }

    async fn authenticate(&mut self, credentials: &SaslCredentials) -> KafkaResult<()> {
        let Some(mechanism) = credentials.mechanism() else {
            return Ok(());
        };

        let handshake = self
            .send(
                &SaslHandshakeRequest::default()
                    .with_mechanism(StrBytes::from_static_str(mechanism)),
                SASL_HANDSHAKE_VERSION,
            )
            .await?;
        if handshake.error_code != 0 {
            let offered: Vec<String> = handshake.mechanisms.iter().map(|m| m.to_string()).collect();
            return Err(KafkaError::Sasl {
                mechanism,
                message: format!(
                    "handshake failed with error code {}; broker offers [{}]",
                    handshake.error_code,
                    offered.join(", ")
                ),
            });
        }

        match credentials {
            SaslCredentials::None => Ok(()),
            SaslCredentials::Scram { username, password } => {
                let mut scram = ScramClient::new(username, password);
                let server_first = self.sasl_step(mechanism, scram.client_first()).await?;
                let client_final = scram.client_final(&server_first)?;
                let server_final = self.sasl_step(mechanism, client_final).await?;
                scram.verify_server_final(&server_final)
            }
            SaslCredentials::OAuthBearer(source) => {
                let token = source.token().await?;
                self.sasl_step(mechanism, oauthbearer_initial_response(&token.value))
                    .await
                    .map(|_| ())
            }
        }
    }

    async fn sasl_step(&mut self, mechanism: &'static str, auth_bytes: Vec<u8>) -> KafkaResult<Bytes> {
        let response = self
            .send(
                &SaslAuthenticateRequest::default().with_auth_bytes(Bytes::from(auth_bytes)),
                SASL_AUTHENTICATE_VERSION,
            )
            .await?;
        if response.error_code != 0 {
            return Err(KafkaError::Sasl {
                mechanism,
                message: response
                    .error_message
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("error code {}", response.error_code)),
            });
        }
        Ok(response.auth_bytes)
    }

    /// Shut the connection down. Errors are logged, not returned.
    pub async fn close(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!(address = %self.address, error = %e, "error closing admin session");
        }
    }
}

/// Highest version in both ranges.
pub fn negotiate(client_min: i16, client_max: i16, broker_min: i16, broker_max: i16) -> Option<i16> {
    let high = client_max.min(broker_max);
    let low = client_min.max(broker_min);
    (high >= low).then_some(high)
}

/// TLS server name for a `host:port` address; IPv6 brackets are stripped.
fn server_name(address: &str) -> &str {
    let host = address.rsplit_once(':').map_or(address, |(host, _)| host);
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}
