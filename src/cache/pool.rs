use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::error::PoolError;

/// Checkpoint state of the storage pool that archives the system stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolData {
    pub id: String,
    /// Seconds since epoch of the last archived bundle.
    pub current_key: u64,
    /// Seconds between bundle uploads.
    pub upload_interval: u64,
    pub max_bundle_size: u64,
}

impl PoolData {
    pub fn checkpoint_ms(&self) -> u64 {
        self.current_key.saturating_mul(1_000)
    }

    pub fn upload_interval(&self) -> Duration {
        Duration::from_secs(self.upload_interval)
    }
}

#[async_trait]
pub trait PoolDataSource: Send + Sync {
    async fn get_data(&self) -> Result<PoolData, PoolError>;
}

#[derive(Debug, Deserialize)]
struct PoolEnvelope {
    pool: PoolBody,
}

#[derive(Debug, Deserialize)]
struct PoolBody {
    id: String,
    data: PoolFields,
}

// The chain API returns numbers as strings
#[derive(Debug, Deserialize)]
struct PoolFields {
    current_key: String,
    upload_interval: String,
    #[serde(default)]
    max_bundle_size: Option<String>,
}

fn parse_field(name: &str, raw: &str) -> Result<u64, PoolError> {
    raw.trim()
        .parse()
        .map_err(|_| PoolError::Invalid(format!("{name} is not a number: {raw:?}")))
}

impl TryFrom<PoolEnvelope> for PoolData {
    type Error = PoolError;

    fn try_from(envelope: PoolEnvelope) -> Result<Self, Self::Error> {
        let fields = envelope.pool.data;
        Ok(Self {
            id: envelope.pool.id,
            current_key: parse_field("current_key", &fields.current_key)?,
            upload_interval: parse_field("upload_interval", &fields.upload_interval)?,
            max_bundle_size: match fields.max_bundle_size {
                Some(raw) => parse_field("max_bundle_size", &raw)?,
                None => 0,
            },
        })
    }
}

/// Parses the body of a pool query.
pub fn parse_pool_response(body: &str) -> Result<PoolData, PoolError> {
    let envelope: PoolEnvelope =
        serde_json::from_str(body).map_err(|e| PoolError::Invalid(e.to_string()))?;
    envelope.try_into()
}

/// Reads pool state from a chain REST endpoint.
pub struct HttpPoolDataSource {
    http_client: reqwest::Client,
    url: String,
    pool_id: String,
}

impl HttpPoolDataSource {
    pub fn new(url: impl Into<String>, pool_id: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            url: url.into().trim_end_matches('/').to_string(),
            pool_id: pool_id.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/kyve/query/v1beta1/pool/{}", self.url, self.pool_id)
    }
}

#[async_trait]
impl PoolDataSource for HttpPoolDataSource {
    async fn get_data(&self) -> Result<PoolData, PoolError> {
        let body = self
            .http_client
            .get(self.endpoint())
            .timeout(Duration::from_secs(10))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_pool_response(&body)
    }
}
