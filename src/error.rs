//! Error types for discovery, scanning and persistence.
//!
//! Every layer wraps its failures with enough context to identify the
//! cluster, broker or file involved. Failures that higher layers branch on
//! carry an [`ErrorClass`] so callers never match on message text.

use thiserror::Error;

/// Stable classification of a provider or broker failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The operation is not available on this cluster variant.
    Unsupported,
    /// Provider quota or request rate exceeded.
    Throttled,
    /// The addressed resource does not exist.
    NotFound,
    /// Network or availability problem that may clear on its own.
    Transient,
    /// Anything else.
    Fatal,
}

/// Message fragments brokers return when ACL queries hit a cluster without an
/// authorizer. Deliberately narrow; see DESIGN.md.
pub const ACL_UNSUPPORTED_MESSAGES: &[&str] = &["No Authorizer is configured"];

/// Errors raised while choosing an authentication method.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no authentication method enabled for cluster")]
    NoneEnabled,

    #[error("more than one authentication method selected: {}", .0.join(", "))]
    MultipleSelected(Vec<&'static str>),

    #[error("no credentials entry for cluster {arn} in region {region}")]
    MissingEntry { region: String, arn: String },

    #[error("{method} is selected but {field} is empty")]
    MissingSecret {
        method: &'static str,
        field: &'static str,
    },
}

/// Errors returned by control-plane (AWS API) calls.
#[derive(Error, Debug, Clone)]
pub enum ControlPlaneError {
    #[error("{operation} failed ({class:?}): {message}")]
    Api {
        operation: &'static str,
        class: ErrorClass,
        message: String,
    },

    #[error("{operation} cancelled while waiting for a request token")]
    Cancelled { operation: &'static str },
}

impl ControlPlaneError {
    pub fn new(operation: &'static str, class: ErrorClass, message: impl Into<String>) -> Self {
        Self::Api {
            operation,
            class,
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Api { class, .. } => *class,
            Self::Cancelled { .. } => ErrorClass::Fatal,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Errors raised while talking to brokers.
#[derive(Error, Debug)]
pub enum KafkaError {
    #[error("failed to connect to broker {address}: {message}")]
    Connect { address: String, message: String },

    #[error("no reachable bootstrap broker among [{}]", .0.join(", "))]
    NoBootstrap(Vec<String>),

    #[error("failed to load TLS material from '{path}': {message}")]
    TlsMaterial { path: String, message: String },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("SASL {mechanism} authentication failed: {message}")]
    Sasl {
        mechanism: &'static str,
        message: String,
    },

    #[error("IAM auth token generation failed: {0}")]
    Token(String),

    #[error("broker I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request to {address} timed out")]
    Timeout { address: String },

    #[error("protocol encode error: {0}")]
    Encode(String),

    #[error("protocol decode error: {0}")]
    Decode(String),

    #[error("correlation ID mismatch: expected {expected}, got {actual}")]
    CorrelationIdMismatch { expected: i32, actual: i32 },

    #[error("broker does not support {api} in versions {client_min}-{client_max}")]
    UnsupportedVersion {
        api: &'static str,
        client_min: i16,
        client_max: i16,
    },

    #[error("{operation} failed for '{resource}' with error code {code}: {message}")]
    Broker {
        operation: &'static str,
        resource: String,
        code: i16,
        message: String,
    },

    #[error("consumer error: {0}")]
    Consumer(#[from] rdkafka::error::KafkaError),

    #[error("invalid connection settings: {0}")]
    Config(String),
}

impl KafkaError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::UnsupportedVersion { .. } => ErrorClass::Unsupported,
            Self::Broker { code, message, .. } => {
                let by_message = ACL_UNSUPPORTED_MESSAGES
                    .iter()
                    .any(|fragment| message.contains(fragment));
                if by_message {
                    ErrorClass::Unsupported
                } else {
                    classify_broker_code(*code)
                }
            }
            Self::Connect { .. }
            | Self::NoBootstrap(_)
            | Self::Io(_)
            | Self::Timeout { .. }
            | Self::Consumer(_) => ErrorClass::Transient,
            _ => ErrorClass::Fatal,
        }
    }
}

/// Map a Kafka protocol error code onto an [`ErrorClass`].
pub fn classify_broker_code(code: i16) -> ErrorClass {
    match code {
        // SECURITY_DISABLED, UNSUPPORTED_VERSION
        54 | 35 => ErrorClass::Unsupported,
        // UNKNOWN_TOPIC_OR_PARTITION, RESOURCE_NOT_FOUND
        3 | 91 => ErrorClass::NotFound,
        // THROTTLING_QUOTA_EXCEEDED
        89 => ErrorClass::Throttled,
        // LEADER_NOT_AVAILABLE, NOT_LEADER_OR_FOLLOWER, REQUEST_TIMED_OUT,
        // COORDINATOR_LOAD_IN_PROGRESS, COORDINATOR_NOT_AVAILABLE, NOT_CONTROLLER
        5 | 6 | 7 | 14 | 15 | 41 => ErrorClass::Transient,
        _ => ErrorClass::Fatal,
    }
}

/// Errors raised by the state and credentials stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("failed to serialize {what}: {message}")]
    Serialize { what: &'static str, message: String },

    #[error("failed to write temp file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to rename {from} -> {to}: {source}")]
    Rename {
        from: String,
        to: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is locked by another invocation (remove {lock} if it is stale)")]
    Locked { path: String, lock: String },

    #[error("giving up on {path} after {attempts} attempts: {source}")]
    RetriesExhausted {
        path: String,
        attempts: u32,
        #[source]
        source: Box<StoreError>,
    },

    #[error("secret store error: {0}")]
    Secret(String),
}

/// Errors raised while loading or validating engine configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failure of one cluster's scan. The orchestrator logs it and moves on.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Kafka(#[from] KafkaError),

    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),

    #[error("cluster has no bootstrap brokers for {method}")]
    MissingBootstrap { method: &'static str },
}

impl ScanError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Kafka(e) => e.class(),
            Self::ControlPlane(e) => e.class(),
            Self::Auth(_) | Self::MissingBootstrap { .. } => ErrorClass::Fatal,
        }
    }
}

pub type KafkaResult<T> = std::result::Result<T, KafkaError>;
pub type ControlPlaneResult<T> = std::result::Result<T, ControlPlaneError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_enabled_message() {
        assert_eq!(
            AuthError::NoneEnabled.to_string(),
            "no authentication method enabled for cluster"
        );
    }

    #[test]
    fn test_security_disabled_is_unsupported() {
        let err = KafkaError::Broker {
            operation: "DescribeAcls",
            resource: "cluster".to_string(),
            code: 54,
            message: String::new(),
        };
        assert_eq!(err.class(), ErrorClass::Unsupported);
    }

    #[test]
    fn test_authorizer_message_is_unsupported() {
        let err = KafkaError::Broker {
            operation: "DescribeAcls",
            resource: "cluster".to_string(),
            code: -1,
            message: "No Authorizer is configured on the broker".to_string(),
        };
        assert_eq!(err.class(), ErrorClass::Unsupported);
    }

    #[test]
    fn test_authorization_failure_is_fatal() {
        assert_eq!(classify_broker_code(31), ErrorClass::Fatal);
        assert_eq!(classify_broker_code(41), ErrorClass::Transient);
    }

    #[test]
    fn test_cancelled_is_not_throttled() {
        let err = ControlPlaneError::Cancelled {
            operation: "DescribeClusterV2",
        };
        assert!(err.is_cancelled());
        assert_ne!(err.class(), ErrorClass::Throttled);
    }
}
