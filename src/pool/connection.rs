use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a pooled connection. Two connections with the same key never
/// coexist in one pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub service: String,
    pub namespace: String,
    pub address: String,
}

/// A single live link to one endpoint of one service.
///
/// The handle is owned by the pool while the connection is a member; once the
/// connection leaves the pool the handle is passed to the capability's
/// teardown.
#[derive(Debug)]
pub struct Connection<H> {
    id: u64,
    handle: H,
    address: String,
    service: String,
    namespace: String,
    connected_at: DateTime<Utc>,
}

impl<H> Connection<H> {
    pub fn new(
        handle: H,
        address: impl Into<String>,
        service: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            handle,
            address: address.into(),
            service: service.into(),
            namespace: namespace.into(),
            connected_at: Utc::now(),
        }
    }

    /// Process-unique id; distinguishes a reconnect to the same address.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn key(&self) -> ConnectionKey {
        ConnectionKey {
            service: self.service.clone(),
            namespace: self.namespace.clone(),
            address: self.address.clone(),
        }
    }

    pub fn into_handle(self) -> H {
        self.handle
    }
}

/// A connection reported dead by a health cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeadConnection {
    pub id: u64,
    pub address: String,
}

impl<H> From<&Connection<H>> for DeadConnection {
    fn from(connection: &Connection<H>) -> Self {
        Self {
            id: connection.id,
            address: connection.address.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_per_connection() {
        let a = Connection::new((), "10.0.0.1", "search", "prod");
        let b = Connection::new((), "10.0.0.1", "search", "prod");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn dead_report_keeps_identity() {
        let conn = Connection::new(7u32, "10.0.0.2", "search", "prod");
        let dead = DeadConnection::from(&conn);
        assert_eq!(dead.id, conn.id());
        assert_eq!(dead.address, "10.0.0.2");
        assert_eq!(conn.into_handle(), 7);
    }
}
