pub mod connection;
pub mod refresh;
pub mod registry;
pub mod service_pool;

pub use connection::{Connection, ConnectionKey, DeadConnection};
pub use refresh::{RefreshReport, Refresher};
pub use registry::Registry;
pub use service_pool::{PoolStats, PooledConnection, ServicePool};
