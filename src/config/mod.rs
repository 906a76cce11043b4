//! Node Configuration
//!
//! Layered configuration for a broker node: built-in defaults, an optional TOML file,
//! then `LOGSTORE__<SECTION>__<KEY>` environment variables. Every section falls back
//! to its `Default` when omitted, so an empty file is a valid configuration.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node: NodeSection,
    pub storage: StorageConfig,
    pub heartbeat: HeartbeatConfig,
    pub roll_call: RollCallConfig,
    pub propagation: PropagationConfig,
    pub consensus: ConsensusConfig,
    pub cache: CacheConfig,
    pub pool: PoolConfig,
    pub recovery: RecoveryConfig,
    pub ingestion: IngestionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Hex ed25519 secret. A fresh key is generated when absent.
    pub private_key: Option<String>,
    pub http_bind: String,
    pub udp_bind: String,
    /// UDP addresses of the other brokers on the system stream.
    pub peers: Vec<String>,
    pub system_stream_id: String,
    pub system_partitions: u32,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            private_key: None,
            http_bind: "127.0.0.1:7171".to_string(),
            udp_bind: "127.0.0.1:7170".to_string(),
            peers: Vec::new(),
            system_stream_id: "logstore-system".to_string(),
            system_partitions: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub max_bucket_records: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_bucket_records: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
    pub threshold_ms: u64,
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn threshold(&self) -> Duration {
        Duration::from_millis(self.threshold_ms)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            threshold_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RollCallConfig {
    pub round_ms: u64,
    pub spread_ms: u64,
}

impl RollCallConfig {
    pub fn round(&self) -> Duration {
        Duration::from_millis(self.round_ms)
    }

    pub fn spread(&self) -> Duration {
        Duration::from_millis(self.spread_ms)
    }
}

impl Default for RollCallConfig {
    fn default() -> Self {
        Self {
            round_ms: 10_000,
            spread_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    pub timeout_ms: u64,
    /// Fraction of expected peers that must respond, in `(0, 1]`.
    pub quorum_threshold: f64,
    pub dispatcher_ttl_ms: u64,
    pub dispatcher_sweep_ms: u64,
    /// Records per `QueryPropagate` message.
    pub propagate_batch_size: usize,
}

impl PropagationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn dispatcher_ttl(&self) -> Duration {
        Duration::from_millis(self.dispatcher_ttl_ms)
    }

    pub fn dispatcher_sweep(&self) -> Duration {
        Duration::from_millis(self.dispatcher_sweep_ms)
    }
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            quorum_threshold: 1.0,
            dispatcher_ttl_ms: 60_000,
            dispatcher_sweep_ms: 10_000,
            propagate_batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub timeout_ms: u64,
}

impl ConsensusConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Retention used when the storage pool cannot be queried.
    pub default_window_ms: u64,
    /// Shrink cadence used when the storage pool cannot be queried.
    pub default_shrink_interval_ms: u64,
}

impl CacheConfig {
    pub fn default_window(&self) -> Duration {
        Duration::from_millis(self.default_window_ms)
    }

    pub fn default_shrink_interval(&self) -> Duration {
        Duration::from_millis(self.default_shrink_interval_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_window_ms: 60 * 60 * 1_000,
            default_shrink_interval_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub url: Option<String>,
    pub pool_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub interval_ms: u64,
    pub batch_size: usize,
    pub response_limit: u64,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub round_timeout_ms: u64,
}

impl RecoveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            batch_size: 50,
            response_limit: 5,
            max_attempts: 3,
            retry_backoff_ms: 1_000,
            round_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    pub confirmation_ttl_ms: u64,
    pub cleanup_interval_ms: u64,
}

impl IngestionConfig {
    pub fn confirmation_ttl(&self) -> Duration {
        Duration::from_millis(self.confirmation_ttl_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            confirmation_ttl_ms: 60_000,
            cleanup_interval_ms: 60_000,
        }
    }
}

impl NodeConfig {
    /// Loads defaults, then the TOML file at `path` if it exists, then the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a source cannot be read or a value has the wrong type.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }

        builder
            .add_source(
                Environment::with_prefix("LOGSTORE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("node.peers"),
            )
            .build()?
            .try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.node.system_partitions == 0 {
            return Err("System stream needs at least one partition".to_string());
        }

        if self.storage.max_bucket_records == 0 {
            return Err("max_bucket_records must be greater than 0".to_string());
        }

        if self.heartbeat.threshold_ms <= self.heartbeat.interval_ms {
            return Err(format!(
                "Heartbeat threshold ({}ms) must exceed the interval ({}ms)",
                self.heartbeat.threshold_ms, self.heartbeat.interval_ms
            ));
        }

        if self.roll_call.spread_ms > self.roll_call.round_ms {
            return Err("Roll call spread cannot exceed the round".to_string());
        }

        let quorum = self.propagation.quorum_threshold;
        if !(quorum > 0.0 && quorum <= 1.0) {
            return Err(format!("Quorum threshold must be in (0, 1], got {quorum}"));
        }

        if self.propagation.timeout_ms == 0 || self.consensus.timeout_ms == 0 {
            return Err("Timeouts must be greater than 0".to_string());
        }

        if self.propagation.propagate_batch_size == 0 {
            return Err("Propagate batch size must be positive".to_string());
        }

        if self.recovery.batch_size == 0 || self.recovery.response_limit == 0 {
            return Err("Recovery batch size and response limit must be positive".to_string());
        }

        if self.pool.url.is_some() != self.pool.pool_id.is_some() {
            return Err("pool.url and pool.pool_id must be set together".to_string());
        }

        Ok(())
    }
}
