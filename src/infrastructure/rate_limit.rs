//! Admission control for control-plane calls.
//!
//! MSK enforces low per-account request rates, so every call first takes a
//! token from a shared bucket. Operations that throttle most often get a
//! second retry layer above the SDK's own retryer.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ControlPlaneConfig;
use crate::domain::cluster::{BootstrapBrokers, BrokerNode, CompatibleVersions, MskConnector};
use crate::error::{ControlPlaneError, ControlPlaneResult, ErrorClass};
use crate::infrastructure::control_plane::{ClusterDescription, ControlPlane, Page};

/// Token bucket shared by all calls made through one client.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_per_sec: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A bucket that starts full.
    pub fn new(requests_per_second: u32, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_sec: f64::from(requests_per_second.max(1)),
        }
    }

    /// Wait until a token is available and take it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Like [`acquire`](Self::acquire), but gives up when `cancel` fires.
    /// Returns `false` when cancelled.
    pub async fn acquire_or_cancel(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = self.acquire() => true,
        }
    }
}

/// A [`ControlPlane`] decorator applying the token bucket and the throttle
/// retry loop.
pub struct RateLimitedControlClient<C> {
    inner: C,
    bucket: TokenBucket,
    max_throttle_retries: u32,
    cancel: CancellationToken,
}

impl<C: ControlPlane> RateLimitedControlClient<C> {
    pub fn new(inner: C, config: &ControlPlaneConfig, cancel: CancellationToken) -> Self {
        Self {
            inner,
            bucket: TokenBucket::new(config.requests_per_second, config.burst),
            max_throttle_retries: config.max_throttle_retries,
            cancel,
        }
    }

    async fn admit(&self, operation: &'static str) -> ControlPlaneResult<()> {
        if self.bucket.acquire_or_cancel(&self.cancel).await {
            Ok(())
        } else {
            Err(ControlPlaneError::Cancelled { operation })
        }
    }

    async fn call<T, Fut>(&self, operation: &'static str, call: Fut) -> ControlPlaneResult<T>
    where
        Fut: Future<Output = ControlPlaneResult<T>> + Send,
    {
        self.admit(operation).await?;
        call.await
    }

    async fn call_with_throttle_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        call: F,
    ) -> ControlPlaneResult<T>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = ControlPlaneResult<T>> + Send,
        T: Send,
    {
        let mut retries = 0;
        loop {
            self.admit(operation).await?;
            match call().await {
                Err(e) if e.class() == ErrorClass::Throttled && retries < self.max_throttle_retries => {
                    retries += 1;
                    warn!(
                        operation,
                        region = self.inner.region(),
                        attempt = retries,
                        max = self.max_throttle_retries,
                        "control plane throttled, retrying"
                    );
                }
                Err(e) if e.class() == ErrorClass::Throttled => {
                    warn!(operation, retries, "throttle retries exhausted");
                    return Err(e);
                }
                other => {
                    if retries > 0 {
                        debug!(operation, retries, "call succeeded after throttling");
                    }
                    return other;
                }
            }
        }
    }
}

#[async_trait]
impl<C: ControlPlane> ControlPlane for RateLimitedControlClient<C> {
    fn region(&self) -> &str {
        self.inner.region()
    }

    async fn list_clusters(
        &self,
        next_token: Option<String>,
    ) -> ControlPlaneResult<Page<ClusterDescription>> {
        self.call("ListClustersV2", self.inner.list_clusters(next_token))
            .await
    }

    async fn describe_cluster(&self, arn: &str) -> ControlPlaneResult<ClusterDescription> {
        self.call_with_throttle_retry("DescribeClusterV2", || self.inner.describe_cluster(arn))
            .await
    }

    async fn get_bootstrap_brokers(&self, arn: &str) -> ControlPlaneResult<BootstrapBrokers> {
        self.call_with_throttle_retry("GetBootstrapBrokers", || {
            self.inner.get_bootstrap_brokers(arn)
        })
        .await
    }

    async fn list_nodes(
        &self,
        arn: &str,
        next_token: Option<String>,
    ) -> ControlPlaneResult<Page<BrokerNode>> {
        self.call_with_throttle_retry("ListNodes", || {
            self.inner.list_nodes(arn, next_token.clone())
        })
        .await
    }

    async fn get_cluster_policy(&self, arn: &str) -> ControlPlaneResult<Option<String>> {
        self.call_with_throttle_retry("GetClusterPolicy", || self.inner.get_cluster_policy(arn))
            .await
    }

    async fn get_compatible_versions(
        &self,
        arn: &str,
    ) -> ControlPlaneResult<Vec<CompatibleVersions>> {
        self.call_with_throttle_retry("GetCompatibleKafkaVersions", || {
            self.inner.get_compatible_versions(arn)
        })
        .await
    }

    async fn list_connectors(
        &self,
        next_token: Option<String>,
    ) -> ControlPlaneResult<Page<MskConnector>> {
        self.call("ListConnectors", self.inner.list_connectors(next_token))
            .await
    }
}
