//! Service Directory boundary.
//!
//! A directory maps a logical `(service, namespace)` pair to the set of
//! endpoint addresses currently backing it. How names are matched is up to
//! the directory, not the pool.

pub mod dns;

pub use dns::DnsDirectory;

use crate::config::{DiscoveryConfig, StaticService};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("service '{service}' not found in namespace '{namespace}'")]
    NotFound { service: String, namespace: String },

    #[error("directory unreachable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ServiceDirectory: Send + Sync + 'static {
    async fn resolve(
        &self,
        service: &str,
        namespace: &str,
    ) -> Result<HashSet<String>, DirectoryError>;
}

/// In-memory directory, updatable at runtime.
///
/// Lookup prefers an exact name; otherwise the first service (in name order)
/// of the namespace whose name contains the requested one.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    // namespace -> service -> endpoints
    services: RwLock<BTreeMap<String, BTreeMap<String, HashSet<String>>>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_services(services: &[StaticService]) -> Self {
        let mut map: BTreeMap<String, BTreeMap<String, HashSet<String>>> = BTreeMap::new();
        for service in services {
            map.entry(service.namespace.clone())
                .or_default()
                .entry(service.name.clone())
                .or_default()
                .extend(service.endpoints.iter().cloned());
        }
        Self {
            services: RwLock::new(map),
        }
    }

    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::from_services(&config.services)
    }

    /// Replace the endpoint set registered for a service.
    pub async fn set_endpoints<I, S>(&self, service: &str, namespace: &str, endpoints: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let endpoints: HashSet<String> = endpoints.into_iter().map(Into::into).collect();
        debug!(
            service = %service,
            namespace = %namespace,
            endpoints = endpoints.len(),
            "Static directory entry updated"
        );
        let mut services = self.services.write().await;
        services
            .entry(namespace.to_string())
            .or_default()
            .insert(service.to_string(), endpoints);
    }

    pub async fn remove_service(&self, service: &str, namespace: &str) -> bool {
        let mut services = self.services.write().await;
        services
            .get_mut(namespace)
            .map(|entries| entries.remove(service).is_some())
            .unwrap_or(false)
    }
}

#[async_trait]
impl ServiceDirectory for StaticDirectory {
    async fn resolve(
        &self,
        service: &str,
        namespace: &str,
    ) -> Result<HashSet<String>, DirectoryError> {
        let services = self.services.read().await;
        let not_found = || DirectoryError::NotFound {
            service: service.to_string(),
            namespace: namespace.to_string(),
        };

        let entries = services.get(namespace).ok_or_else(not_found)?;

        if let Some(endpoints) = entries.get(service) {
            return Ok(endpoints.clone());
        }

        entries
            .iter()
            .find(|(name, _)| name.contains(service))
            .map(|(_, endpoints)| endpoints.clone())
            .ok_or_else(not_found)
    }
}
