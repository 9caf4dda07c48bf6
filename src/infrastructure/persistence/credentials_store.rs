//! Operator-edited YAML file holding auth slots per cluster.
//!
//! ```yaml
//! regions:
//!   us-east-1:
//!     arn:aws:kafka:us-east-1:123456789012:cluster/orders/uuid:
//!       iam:
//!         use: true
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::auth::{AuthMethodConfig, ClusterAuthEntry};
use crate::error::{AuthError, StoreError, StoreResult};
use crate::infrastructure::persistence::state_store::{write_atomic, OsFs, StateFs};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// region -> cluster ARN -> slots
    #[serde(default)]
    pub regions: BTreeMap<String, BTreeMap<String, AuthMethodConfig>>,
}

impl Credentials {
    pub fn entry(&self, region: &str, cluster_arn: &str) -> Result<&AuthMethodConfig, AuthError> {
        self.regions
            .get(region)
            .and_then(|clusters| clusters.get(cluster_arn))
            .ok_or_else(|| AuthError::MissingEntry {
                region: region.to_string(),
                arn: cluster_arn.to_string(),
            })
    }

    /// Add entries for clusters not yet present. Existing entries, which
    /// may carry operator secrets, are left alone. Returns how many were
    /// added.
    pub fn merge(&mut self, entries: impl IntoIterator<Item = ClusterAuthEntry>) -> usize {
        let mut added = 0;
        for entry in entries {
            let clusters = self.regions.entry(entry.region).or_default();
            if clusters.contains_key(&entry.cluster_arn) {
                debug!(cluster = %entry.cluster_arn, "credentials entry exists, keeping it");
                continue;
            }
            clusters.insert(entry.cluster_arn, entry.config);
            added += 1;
        }
        added
    }
}

pub struct CredentialsStore<F: StateFs = OsFs> {
    path: PathBuf,
    fs: F,
}

impl CredentialsStore<OsFs> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fs: OsFs,
        }
    }
}

impl<F: StateFs> CredentialsStore<F> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty set of credentials.
    pub fn load(&self) -> StoreResult<Credentials> {
        let path = self.path.display().to_string();
        let Some(contents) = self
            .fs
            .read(&self.path)
            .map_err(|source| StoreError::Read {
                path: path.clone(),
                source,
            })?
        else {
            return Ok(Credentials::default());
        };
        serde_yaml::from_slice(&contents).map_err(|e| StoreError::Parse {
            path,
            message: e.to_string(),
        })
    }

    pub fn save(&self, credentials: &Credentials) -> StoreResult<()> {
        let contents = serde_yaml::to_string(credentials).map_err(|e| StoreError::Serialize {
            what: "credentials",
            message: e.to_string(),
        })?;
        write_atomic(&self.fs, &self.path, contents.as_bytes())?;
        info!(path = %self.path.display(), "credentials file written");
        Ok(())
    }
}
