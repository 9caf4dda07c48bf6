//! TLS for admin sessions.
//!
//! Certificate material is loaded once per cluster, before any socket is
//! opened, so a bad path fails the cluster immediately with the path in the
//! error.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::ring::default_provider;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector as TokioTlsConnector;
use tracing::debug;

use crate::error::{KafkaError, KafkaResult};

fn ensure_crypto_provider() {
    // Already installed is fine.
    let _ = CryptoProvider::install_default(default_provider());
}

/// Paths for mutual TLS.
#[derive(Debug, Clone)]
pub struct ClientIdentity<'a> {
    pub client_cert: &'a str,
    pub private_key: &'a str,
}

#[derive(Clone)]
pub struct TlsConnector {
    inner: TokioTlsConnector,
}

impl TlsConnector {
    /// Public web PKI roots unless `ca_cert` is given.
    pub fn new(ca_cert: Option<&str>, identity: Option<ClientIdentity<'_>>) -> KafkaResult<Self> {
        ensure_crypto_provider();

        let roots = match ca_cert {
            Some(path) => {
                let mut roots = RootCertStore::empty();
                let (added, _ignored) =
                    roots.add_parsable_certificates(load_certificates(Path::new(path))?);
                if added == 0 {
                    return Err(KafkaError::TlsMaterial {
                        path: path.to_string(),
                        message: "no usable CA certificates".to_string(),
                    });
                }
                debug!(path, added, "loaded CA certificates");
                roots
            }
            None => {
                let mut roots = RootCertStore::empty();
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                roots
            }
        };

        let builder = ClientConfig::builder().with_root_certificates(roots);
        let config = match identity {
            Some(identity) => {
                let certs = load_certificates(Path::new(identity.client_cert))?;
                let key = load_private_key(Path::new(identity.private_key))?;
                builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| KafkaError::TlsMaterial {
                        path: identity.private_key.to_string(),
                        message: format!("client certificate and key do not match: {e}"),
                    })?
            }
            None => builder.with_no_client_auth(),
        };

        Ok(Self {
            inner: TokioTlsConnector::from(Arc::new(config)),
        })
    }

    pub async fn connect(
        &self,
        server_name: &str,
        stream: TcpStream,
    ) -> KafkaResult<TlsStream<TcpStream>> {
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|e| KafkaError::Tls(format!("invalid server name '{server_name}': {e}")))?;

        self.inner
            .connect(name, stream)
            .await
            .map_err(|e| KafkaError::Tls(format!("handshake with {server_name} failed: {e}")))
    }
}

fn load_certificates(path: &Path) -> KafkaResult<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path).map_err(|e| KafkaError::TlsMaterial {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| KafkaError::TlsMaterial {
            path: path.display().to_string(),
            message: format!("malformed PEM: {e}"),
        })?;

    if certs.is_empty() {
        return Err(KafkaError::TlsMaterial {
            path: path.display().to_string(),
            message: "no certificates found".to_string(),
        });
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> KafkaResult<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path).map_err(|e| KafkaError::TlsMaterial {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| KafkaError::TlsMaterial {
            path: path.display().to_string(),
            message: format!("malformed PEM: {e}"),
        })?
        .ok_or_else(|| KafkaError::TlsMaterial {
            path: path.display().to_string(),
            message: "no private key found".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_default_roots() {
        assert!(TlsConnector::new(None, None).is_ok());
    }

    #[test]
    fn test_missing_ca_names_the_path() {
        let err = TlsConnector::new(Some("/nonexistent/ca.pem"), None)
            .err()
            .unwrap();
        match err {
            KafkaError::TlsMaterial { path, .. } => assert_eq!(path, "/nonexistent/ca.pem"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_pem_client_cert_fails_fast() {
        let cert = file_with("not a certificate");
        let key = file_with("not a key");
        let err = TlsConnector::new(
            None,
            Some(ClientIdentity {
                client_cert: cert.path().to_str().unwrap(),
                private_key: key.path().to_str().unwrap(),
            }),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains(cert.path().to_str().unwrap()));
    }

    #[test]
    fn test_missing_private_key() {
        let key = file_with("");
        let err = load_private_key(key.path()).unwrap_err();
        assert!(err.to_string().contains("no private key found"));
    }
}
