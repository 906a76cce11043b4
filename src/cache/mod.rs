//! System Cache & Recovery
//!
//! Brokers keep a rolling window of query and proof traffic from the system stream so a
//! peer that was offline can catch up.
//!
//! - **`system_cache`**: the window itself. It is trimmed to the storage pool's last
//!   archived checkpoint, or to a fixed window when the pool is unreachable.
//! - **`recovery`**: replays a slice of the window as numbered, paced batches.
//! - **`recovery_client`**: requests a replay and rejects rounds with sequence gaps.
//! - **`pool`**: where the archive checkpoint comes from.

pub mod pool;
pub mod recovery;
pub mod recovery_client;
pub mod system_cache;

pub use pool::{HttpPoolDataSource, PoolData, PoolDataSource};
pub use recovery::RecoveryServer;
pub use recovery_client::{RecoveryClient, RecoveryReport, ResponderProgress};
pub use system_cache::{CachedRecord, SystemCache};
