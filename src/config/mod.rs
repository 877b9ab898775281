use crate::utils::error::{PoolError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Services the host process keeps warm from startup.
    #[serde(default)]
    pub watch: Vec<WatchedService>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    #[serde(default = "default_full_scan_interval_secs")]
    pub full_scan_interval_secs: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
    #[serde(default = "default_eviction_queue_capacity")]
    pub eviction_queue_capacity: usize,
    #[serde(default = "default_prune_stale")]
    pub prune_stale: bool,
    #[serde(default = "default_max_concurrent_dials")]
    pub max_concurrent_dials: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Port appended to discovered addresses that carry none (e.g. bare pod IPs).
    #[serde(default)]
    pub default_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_backend")]
    pub backend: String, // "static", "dns"
    #[serde(default = "default_cluster_domain")]
    pub cluster_domain: String,
    #[serde(default)]
    pub services: Vec<StaticService>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticService {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedService {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String, // "json" or "pretty"
}

// Default values
fn default_health_check_interval_ms() -> u64 {
    1000
}

fn default_full_scan_interval_secs() -> u64 {
    60
}

fn default_probe_timeout_ms() -> u64 {
    500
}

fn default_dial_timeout_ms() -> u64 {
    3000
}

fn default_eviction_queue_capacity() -> usize {
    64
}

fn default_prune_stale() -> bool {
    true
}

fn default_max_concurrent_dials() -> usize {
    16
}

fn default_discovery_backend() -> String {
    "static".to_string()
}

fn default_cluster_domain() -> String {
    "svc.cluster.local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: default_health_check_interval_ms(),
            full_scan_interval_secs: default_full_scan_interval_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            dial_timeout_ms: default_dial_timeout_ms(),
            eviction_queue_capacity: default_eviction_queue_capacity(),
            prune_stale: default_prune_stale(),
            max_concurrent_dials: default_max_concurrent_dials(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            backend: default_discovery_backend(),
            cluster_domain: default_cluster_domain(),
            services: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            transport: TransportConfig::default(),
            discovery: DiscoveryConfig::default(),
            logging: LoggingConfig::default(),
            watch: Vec::new(),
        }
    }
}

/// Runtime form of [`PoolConfig`] consumed by the pool engine.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub health_check_interval: Duration,
    pub full_scan_interval: Duration,
    pub probe_timeout: Duration,
    pub dial_timeout: Duration,
    pub eviction_queue_capacity: usize,
    pub prune_stale: bool,
    pub max_concurrent_dials: usize,
}

impl From<&PoolConfig> for PoolSettings {
    fn from(config: &PoolConfig) -> Self {
        Self {
            health_check_interval: Duration::from_millis(config.health_check_interval_ms),
            full_scan_interval: Duration::from_secs(config.full_scan_interval_secs),
            probe_timeout: Duration::from_millis(config.probe_timeout_ms),
            dial_timeout: Duration::from_millis(config.dial_timeout_ms),
            eviction_queue_capacity: config.eviction_queue_capacity,
            prune_stale: config.prune_stale,
            max_concurrent_dials: config.max_concurrent_dials,
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from(&PoolConfig::default())
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| PoolError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| PoolError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings::from(&self.pool)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let pool = &self.pool;

        if pool.health_check_interval_ms == 0 {
            return Err(PoolError::Config(
                "pool.health_check_interval_ms must be greater than 0".to_string(),
            ));
        }

        if pool.full_scan_interval_secs == 0 {
            return Err(PoolError::Config(
                "pool.full_scan_interval_secs must be greater than 0".to_string(),
            ));
        }

        if pool.probe_timeout_ms == 0 || pool.dial_timeout_ms == 0 {
            return Err(PoolError::Config(
                "pool.probe_timeout_ms and pool.dial_timeout_ms must be greater than 0"
                    .to_string(),
            ));
        }

        // A probe may not outlive the cycle that issued it.
        if pool.probe_timeout_ms >= pool.health_check_interval_ms {
            return Err(PoolError::Config(format!(
                "pool.probe_timeout_ms ({}) must be lower than pool.health_check_interval_ms ({})",
                pool.probe_timeout_ms, pool.health_check_interval_ms
            )));
        }

        if pool.eviction_queue_capacity == 0 {
            return Err(PoolError::Config(
                "pool.eviction_queue_capacity must be at least 1".to_string(),
            ));
        }

        if pool.max_concurrent_dials == 0 {
            return Err(PoolError::Config(
                "pool.max_concurrent_dials must be at least 1".to_string(),
            ));
        }

        if !matches!(self.discovery.backend.as_str(), "static" | "dns") {
            return Err(PoolError::Config(format!(
                "Invalid discovery backend: {}. Must be 'static' or 'dns'",
                self.discovery.backend
            )));
        }

        for service in &self.discovery.services {
            if service.name.trim().is_empty() || service.namespace.trim().is_empty() {
                return Err(PoolError::Config(
                    "discovery.services entries require a name and a namespace".to_string(),
                ));
            }
        }

        for service in &self.watch {
            if service.name.trim().is_empty() || service.namespace.trim().is_empty() {
                return Err(PoolError::Config(
                    "watch entries require a name and a namespace".to_string(),
                ));
            }
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(PoolError::Config(format!(
                "Invalid logging format: {}. Must be 'pretty' or 'json'",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Create example configuration file
    pub fn create_example<P: AsRef<Path>>(path: P) -> Result<()> {
        let example = r#"[pool]
health_check_interval_ms = 1000
full_scan_interval_secs = 60
probe_timeout_ms = 500
dial_timeout_ms = 3000
eviction_queue_capacity = 64
prune_stale = true  # Drop connections whose address left the directory
max_concurrent_dials = 16

[transport]
default_port = 9200  # Appended to discovered addresses without a port

[discovery]
backend = "static"  # Options: "static", "dns"
cluster_domain = "svc.cluster.local"

[[discovery.services]]
name = "search-data"
namespace = "default"
endpoints = ["10.0.0.11", "10.0.0.12", "10.0.0.13"]

[logging]
level = "info"  # Options: "trace", "debug", "info", "warn", "error"
format = "pretty"  # Options: "pretty", "json"

[[watch]]
name = "search-data"
namespace = "default"
"#;

        std::fs::write(path.as_ref(), example).map_err(|e| {
            PoolError::Config(format!("Failed to write example config: {}", e))
        })?;

        Ok(())
    }
}
