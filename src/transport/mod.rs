//! Pluggable transport boundary.
//!
//! The pool never speaks a backend protocol itself. A [`Transport`] dials a raw
//! connection to one discovered address, and a caller-supplied [`Capability`]
//! turns that raw connection into an application client handle and probes it
//! for liveness.

pub mod tcp;

pub use tcp::{TcpCapability, TcpHandle, TcpTransport};

use crate::utils::error::BoxError;
use async_trait::async_trait;

/// Dials raw connections to endpoint addresses.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Raw: Send + 'static;

    async fn dial(&self, address: &str) -> std::io::Result<Self::Raw>;
}

/// Caller-supplied operations that keep the pool protocol-agnostic.
///
/// A failed `new_client` means the endpoint is unusable right now; it is
/// skipped, not treated as fatal. A failed `probe` marks the connection dead.
#[async_trait]
pub trait Capability: Send + Sync + 'static {
    type Raw: Send + 'static;
    type Handle: Clone + Send + Sync + 'static;

    async fn new_client(&self, raw: Self::Raw) -> Result<Self::Handle, BoxError>;

    async fn probe(&self, handle: &Self::Handle) -> Result<(), BoxError>;

    /// Teardown for a connection that left the pool. Receives ownership of the handle.
    async fn close(&self, _handle: Self::Handle) {}
}
