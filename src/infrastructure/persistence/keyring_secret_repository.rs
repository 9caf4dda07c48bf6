use keyring::Entry;

use crate::error::{StoreError, StoreResult};

/// Keyring service under which SCRAM passwords are stored.
pub const SERVICE_NAME: &str = "kafka-fleet-scan";

/// Passwords kept outside the credentials file, keyed by cluster ARN.
pub trait SecretRepository: Send + Sync {
    /// `Ok(None)` when nothing is stored for `cluster_arn`.
    fn get_password(&self, cluster_arn: &str) -> StoreResult<Option<String>>;

    fn save_password(&self, cluster_arn: &str, password: &str) -> StoreResult<()>;

    fn delete_password(&self, cluster_arn: &str) -> StoreResult<()>;
}

pub struct KeyringSecretRepository {
    service_name: String,
}

impl KeyringSecretRepository {
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
        }
    }

    fn entry(&self, cluster_arn: &str) -> StoreResult<Entry> {
        Entry::new(&self.service_name, cluster_arn)
            .map_err(|e| StoreError::Secret(format!("failed to create keyring entry: {e}")))
    }
}

impl Default for KeyringSecretRepository {
    fn default() -> Self {
        Self::new(SERVICE_NAME)
    }
}

impl SecretRepository for KeyringSecretRepository {
    fn get_password(&self, cluster_arn: &str) -> StoreResult<Option<String>> {
        match self.entry(cluster_arn)?.get_password() {
            Ok(password) => Ok(Some(password)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StoreError::Secret(format!(
                "failed to read password for {cluster_arn}: {e}"
            ))),
        }
    }

    fn save_password(&self, cluster_arn: &str, password: &str) -> StoreResult<()> {
        self.entry(cluster_arn)?
            .set_password(password)
            .map_err(|e| StoreError::Secret(format!("failed to save password for {cluster_arn}: {e}")))
    }

    fn delete_password(&self, cluster_arn: &str) -> StoreResult<()> {
        match self.entry(cluster_arn)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::Secret(format!(
                "failed to delete password for {cluster_arn}: {e}"
            ))),
        }
    }
}
