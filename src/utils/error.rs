use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by caller-supplied capabilities.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No available endpoints for service '{service}'")]
    NoAvailableEndpoints { service: String },

    #[error("Service directory unavailable for '{service}': {reason}")]
    DirectoryUnavailable { service: String, reason: String },

    #[error("Failed to dial {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Dialing {address} timed out after {timeout:?}")]
    DialTimeout { address: String, timeout: Duration },

    #[error("Failed to construct client for {address}: {reason}")]
    ClientConstruction { address: String, reason: String },

    #[error("Probe failed for {address}: {reason}")]
    Probe { address: String, reason: String },

    #[error("Probe of {address} timed out after {timeout:?}")]
    ProbeTimeout { address: String, timeout: Duration },

    #[error("Pool manager is shutting down")]
    ShuttingDown,

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PoolError>;
