//! MSK IAM bearer tokens for admin sessions and scan consumers.

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use aws_config::Region;
use aws_msk_iam_sasl_signer::generate_auth_token;
use rdkafka::client::{ClientContext, OAuthToken};
use rdkafka::consumer::ConsumerContext;
use tokio::runtime::Handle;
use tracing::debug;

use crate::error::{KafkaError, KafkaResult};

#[derive(Debug, Clone)]
pub struct AuthToken {
    pub value: String,
    /// Absolute expiry, milliseconds since the epoch.
    pub expires_at_ms: i64,
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> KafkaResult<AuthToken>;
}

/// Region-scoped SigV4 token from the default credential chain.
pub struct MskIamTokenSource {
    region: String,
}

impl MskIamTokenSource {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
        }
    }
}

#[async_trait]
impl TokenSource for MskIamTokenSource {
    async fn token(&self) -> KafkaResult<AuthToken> {
        let (value, expires_at_ms) = generate_auth_token(Region::new(self.region.clone()))
            .await
            .map_err(|e| KafkaError::Token(e.to_string()))?;
        debug!(region = %self.region, expires_at_ms, "generated IAM auth token");
        Ok(AuthToken {
            value,
            expires_at_ms,
        })
    }
}

/// rdkafka context for scan consumers. Refreshes OAUTHBEARER tokens when
/// the cluster uses IAM.
pub struct ScanContext {
    token_source: Option<Arc<dyn TokenSource>>,
    runtime: Handle,
}

impl ScanContext {
    /// Must be called from inside a tokio runtime.
    pub fn new(token_source: Option<Arc<dyn TokenSource>>) -> Self {
        Self {
            token_source,
            runtime: Handle::current(),
        }
    }
}

impl ClientContext for ScanContext {
    const ENABLE_REFRESH_OAUTH_TOKEN: bool = true;

    fn generate_oauth_token(
        &self,
        _oauthbearer_config: Option<&str>,
    ) -> Result<OAuthToken, Box<dyn Error>> {
        let source = self
            .token_source
            .clone()
            .ok_or("OAUTHBEARER requested but no token source configured")?;
        let runtime = self.runtime.clone();

        // May be called on a runtime thread; block_on must not run there.
        let token = std::thread::spawn(move || runtime.block_on(source.token()))
            .join()
            .map_err(|_| "IAM token thread panicked")??;

        Ok(OAuthToken {
            token: token.value,
            principal_name: String::new(),
            lifetime_ms: token.expires_at_ms,
        })
    }
}

impl ConsumerContext for ScanContext {}
