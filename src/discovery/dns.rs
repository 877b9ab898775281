use super::{DirectoryError, ServiceDirectory};
use async_trait::async_trait;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::IpAddr;
use tracing::instrument;

/// Resolves `<service>.<namespace>.<cluster_domain>` and returns every
/// address record, as a headless service exposes one record per replica.
#[derive(Debug, Clone)]
pub struct DnsDirectory {
    cluster_domain: String,
}

impl DnsDirectory {
    pub fn new(cluster_domain: impl Into<String>) -> Self {
        Self {
            cluster_domain: cluster_domain.into(),
        }
    }

    pub fn hostname(&self, service: &str, namespace: &str) -> String {
        let domain = self.cluster_domain.trim_matches('.');
        if domain.is_empty() {
            format!("{}.{}", service, namespace)
        } else {
            format!("{}.{}.{}", service, namespace, domain)
        }
    }
}

#[async_trait]
impl ServiceDirectory for DnsDirectory {
    #[instrument(level = "debug", skip(self))]
    async fn resolve(
        &self,
        service: &str,
        namespace: &str,
    ) -> Result<HashSet<String>, DirectoryError> {
        let host = self.hostname(service, namespace);

        // Port is irrelevant for the lookup; the transport applies its own.
        let lookup = tokio::net::lookup_host((host.as_str(), 0))
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => DirectoryError::NotFound {
                    service: service.to_string(),
                    namespace: namespace.to_string(),
                },
                _ => DirectoryError::Unavailable(format!("lookup of {} failed: {}", host, e)),
            })?;

        let mut ips: Vec<IpAddr> = lookup.map(|addr| addr.ip()).collect();
        ips.sort();
        ips.dedup();

        Ok(ips.into_iter().map(|ip| ip.to_string()).collect())
    }
}
