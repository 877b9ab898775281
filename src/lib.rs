// replica-pool - warm connection pools over churning service replicas

pub mod config;
pub mod discovery;
pub mod health;
pub mod manager;
pub mod metrics;
pub mod pool;
pub mod reconcile;
pub mod transport;
pub mod utils;

// Re-export commonly used types
pub use config::{Config, PoolSettings};
pub use discovery::{DirectoryError, DnsDirectory, ServiceDirectory, StaticDirectory};
pub use manager::PoolManager;
pub use pool::{PoolStats, RefreshReport};
pub use transport::{Capability, TcpCapability, TcpHandle, TcpTransport, Transport};
pub use utils::error::{BoxError, PoolError, Result};
