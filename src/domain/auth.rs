use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Authentication methods a cluster can expose, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthMethod {
    UnauthenticatedTls,
    UnauthenticatedPlaintext,
    Iam,
    SaslScram,
    Tls,
}

impl AuthMethod {
    /// Selection order. Methods needing the least stored secret come first.
    pub const PRIORITY: [AuthMethod; 5] = [
        AuthMethod::UnauthenticatedTls,
        AuthMethod::UnauthenticatedPlaintext,
        AuthMethod::Iam,
        AuthMethod::SaslScram,
        AuthMethod::Tls,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::UnauthenticatedTls => "unauthenticated_tls",
            AuthMethod::UnauthenticatedPlaintext => "unauthenticated_plaintext",
            AuthMethod::Iam => "iam",
            AuthMethod::SaslScram => "sasl_scram",
            AuthMethod::Tls => "tls",
        }
    }
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability flags read from a cluster's control-plane configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthCapabilities {
    pub unauthenticated_tls: bool,
    pub unauthenticated_plaintext: bool,
    pub iam: bool,
    pub sasl_scram: bool,
    pub tls: bool,
    /// Serverless clusters only accept IAM.
    pub serverless: bool,
}

impl AuthCapabilities {
    pub fn is_enabled(&self, method: AuthMethod) -> bool {
        match method {
            AuthMethod::UnauthenticatedTls => self.unauthenticated_tls,
            AuthMethod::UnauthenticatedPlaintext => self.unauthenticated_plaintext,
            AuthMethod::Iam => self.iam,
            AuthMethod::SaslScram => self.sasl_scram,
            AuthMethod::Tls => self.tls,
        }
    }
}

/// Pick the single method to use for a cluster, or `None` when nothing is
/// enabled.
pub fn select_auth_method(caps: &AuthCapabilities) -> Option<AuthMethod> {
    if caps.serverless {
        return Some(AuthMethod::Iam);
    }
    AuthMethod::PRIORITY
        .into_iter()
        .find(|method| caps.is_enabled(*method))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnauthenticatedTlsConfig {
    #[serde(rename = "use", default)]
    pub use_method: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnauthenticatedPlaintextConfig {
    #[serde(rename = "use", default)]
    pub use_method: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamConfig {
    #[serde(rename = "use", default)]
    pub use_method: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaslScramConfig {
    #[serde(rename = "use", default)]
    pub use_method: bool,
    #[serde(default)]
    pub username: String,
    /// Left empty to fall back to the OS keyring.
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(rename = "use", default)]
    pub use_method: bool,
    /// Optional; system roots are used when empty.
    #[serde(default)]
    pub ca_cert: String,
    #[serde(default)]
    pub client_cert: String,
    #[serde(default)]
    pub private_key: String,
}

/// Per-cluster authentication slots as stored in the credentials file.
///
/// A present slot means the method is available on the cluster. Discovery
/// creates the slots and marks one as used; the operator fills in secrets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthMethodConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unauthenticated_tls: Option<UnauthenticatedTlsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unauthenticated_plaintext: Option<UnauthenticatedPlaintextConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam: Option<IamConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sasl_scram: Option<SaslScramConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

/// The method chosen for a connection, with its secret material.
#[derive(Clone, PartialEq, Eq)]
pub enum SelectedAuth {
    UnauthenticatedTls,
    UnauthenticatedPlaintext,
    Iam,
    SaslScram { username: String, password: String },
    Tls {
        ca_cert: Option<String>,
        client_cert: String,
        private_key: String,
    },
}

impl SelectedAuth {
    pub fn method(&self) -> AuthMethod {
        match self {
            SelectedAuth::UnauthenticatedTls => AuthMethod::UnauthenticatedTls,
            SelectedAuth::UnauthenticatedPlaintext => AuthMethod::UnauthenticatedPlaintext,
            SelectedAuth::Iam => AuthMethod::Iam,
            SelectedAuth::SaslScram { .. } => AuthMethod::SaslScram,
            SelectedAuth::Tls { .. } => AuthMethod::Tls,
        }
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for SelectedAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectedAuth::SaslScram { username, .. } => f
                .debug_struct("SaslScram")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            other => write!(f, "{}", other.method()),
        }
    }
}

impl AuthMethodConfig {
    /// Build the slots for a freshly discovered cluster and mark the
    /// highest-priority available method as used.
    pub fn from_capabilities(caps: &AuthCapabilities) -> Self {
        let selected = select_auth_method(caps);
        let uses = |method: AuthMethod| selected == Some(method);

        if caps.serverless {
            return Self {
                iam: Some(IamConfig { use_method: true }),
                ..Self::default()
            };
        }

        Self {
            unauthenticated_tls: caps.unauthenticated_tls.then(|| UnauthenticatedTlsConfig {
                use_method: uses(AuthMethod::UnauthenticatedTls),
            }),
            unauthenticated_plaintext: caps.unauthenticated_plaintext.then(|| {
                UnauthenticatedPlaintextConfig {
                    use_method: uses(AuthMethod::UnauthenticatedPlaintext),
                }
            }),
            iam: caps.iam.then(|| IamConfig {
                use_method: uses(AuthMethod::Iam),
            }),
            sasl_scram: caps.sasl_scram.then(|| SaslScramConfig {
                use_method: uses(AuthMethod::SaslScram),
                ..SaslScramConfig::default()
            }),
            tls: caps.tls.then(|| TlsConfig {
                use_method: uses(AuthMethod::Tls),
                ..TlsConfig::default()
            }),
        }
    }

    /// Methods that have a slot, in priority order.
    pub fn available(&self) -> Vec<AuthMethod> {
        AuthMethod::PRIORITY
            .into_iter()
            .filter(|method| self.slot_use(*method).is_some())
            .collect()
    }

    fn slot_use(&self, method: AuthMethod) -> Option<bool> {
        match method {
            AuthMethod::UnauthenticatedTls => {
                self.unauthenticated_tls.as_ref().map(|s| s.use_method)
            }
            AuthMethod::UnauthenticatedPlaintext => {
                self.unauthenticated_plaintext.as_ref().map(|s| s.use_method)
            }
            AuthMethod::Iam => self.iam.as_ref().map(|s| s.use_method),
            AuthMethod::SaslScram => self.sasl_scram.as_ref().map(|s| s.use_method),
            AuthMethod::Tls => self.tls.as_ref().map(|s| s.use_method),
        }
    }

    /// The method marked `use`, with its secrets.
    pub fn selected(&self) -> Result<SelectedAuth, AuthError> {
        let marked: Vec<AuthMethod> = AuthMethod::PRIORITY
            .into_iter()
            .filter(|method| self.slot_use(*method) == Some(true))
            .collect();

        let method = match marked.as_slice() {
            [] => return Err(AuthError::NoneEnabled),
            [one] => *one,
            many => {
                return Err(AuthError::MultipleSelected(
                    many.iter().map(AuthMethod::as_str).collect(),
                ))
            }
        };

        Ok(match method {
            AuthMethod::UnauthenticatedTls => SelectedAuth::UnauthenticatedTls,
            AuthMethod::UnauthenticatedPlaintext => SelectedAuth::UnauthenticatedPlaintext,
            AuthMethod::Iam => SelectedAuth::Iam,
            AuthMethod::SaslScram => {
                let scram = self.sasl_scram.clone().unwrap_or_default();
                if scram.username.is_empty() {
                    return Err(AuthError::MissingSecret {
                        method: "sasl_scram",
                        field: "username",
                    });
                }
                SelectedAuth::SaslScram {
                    username: scram.username,
                    password: scram.password,
                }
            }
            AuthMethod::Tls => {
                let tls = self.tls.clone().unwrap_or_default();
                if tls.client_cert.is_empty() {
                    return Err(AuthError::MissingSecret {
                        method: "tls",
                        field: "client_cert",
                    });
                }
                if tls.private_key.is_empty() {
                    return Err(AuthError::MissingSecret {
                        method: "tls",
                        field: "private_key",
                    });
                }
                SelectedAuth::Tls {
                    ca_cert: (!tls.ca_cert.is_empty()).then_some(tls.ca_cert),
                    client_cert: tls.client_cert,
                    private_key: tls.private_key,
                }
            }
        })
    }
}

/// Auth slots for one discovered cluster, keyed by region and ARN in the
/// credentials file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterAuthEntry {
    pub region: String,
    pub cluster_arn: String,
    pub config: AuthMethodConfig,
}

impl ClusterAuthEntry {
    pub fn from_capabilities(region: &str, cluster_arn: &str, caps: &AuthCapabilities) -> Self {
        Self {
            region: region.to_string(),
            cluster_arn: cluster_arn.to_string(),
            config: AuthMethodConfig::from_capabilities(caps),
        }
    }
}
