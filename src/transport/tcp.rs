use super::{Capability, Transport};
use crate::utils::error::BoxError;
use async_trait::async_trait;
use socket2::SockRef;
use std::io::{Error, ErrorKind};
use std::mem::MaybeUninit;
use std::net::{IpAddr, Shutdown, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, instrument, trace};

/// Plain TCP dialer.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    default_port: Option<u16>,
}

impl TcpTransport {
    pub fn new(default_port: Option<u16>) -> Self {
        Self { default_port }
    }

    /// Turn a discovered address into a `host:port` target.
    ///
    /// Bare IPs and hostnames get the default port; addresses that already
    /// carry a port are used as-is.
    pub fn target(&self, address: &str) -> std::io::Result<String> {
        if address.parse::<SocketAddr>().is_ok() {
            return Ok(address.to_string());
        }

        if let Ok(ip) = address.parse::<IpAddr>() {
            let port = self.require_port(address)?;
            return Ok(SocketAddr::new(ip, port).to_string());
        }

        if let Some((host, port)) = address.rsplit_once(':') {
            if !host.is_empty() && port.parse::<u16>().is_ok() {
                return Ok(address.to_string());
            }
        }

        let port = self.require_port(address)?;
        Ok(format!("{}:{}", address, port))
    }

    fn require_port(&self, address: &str) -> std::io::Result<u16> {
        self.default_port.ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidInput,
                format!("address {} has no port and no default port is set", address),
            )
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Raw = TcpStream;

    #[instrument(level = "debug", skip(self))]
    async fn dial(&self, address: &str) -> std::io::Result<TcpStream> {
        let target = self.target(address)?;
        let stream = TcpStream::connect(target.as_str()).await?;
        stream.set_nodelay(true)?;
        SockRef::from(&stream).set_keepalive(true)?;
        debug!(target = %target, "TCP connection established");
        Ok(stream)
    }
}

/// Client handle over a pooled TCP stream. Clones share the stream.
#[derive(Debug, Clone)]
pub struct TcpHandle {
    stream: Arc<TcpStream>,
    peer: SocketAddr,
}

impl TcpHandle {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

/// Reference capability: the handle is the socket itself and liveness is a
/// non-blocking peek.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpCapability;

#[async_trait]
impl Capability for TcpCapability {
    type Raw = TcpStream;
    type Handle = TcpHandle;

    async fn new_client(&self, raw: TcpStream) -> Result<TcpHandle, BoxError> {
        let peer = raw.peer_addr()?;
        Ok(TcpHandle {
            stream: Arc::new(raw),
            peer,
        })
    }

    async fn probe(&self, handle: &TcpHandle) -> Result<(), BoxError> {
        let socket = SockRef::from(handle.stream());

        if let Some(err) = socket.take_error()? {
            return Err(err.into());
        }

        let mut buf = [MaybeUninit::<u8>::uninit(); 1];
        match socket.peek(&mut buf) {
            Ok(0) => Err(Error::new(ErrorKind::UnexpectedEof, "peer closed the connection").into()),
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn close(&self, handle: TcpHandle) {
        if let Err(e) = SockRef::from(handle.stream()).shutdown(Shutdown::Both) {
            trace!(peer = %handle.peer, error = %e, "Shutdown of pooled stream failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[test]
    fn target_appends_default_port() {
        let transport = TcpTransport::new(Some(9200));
        assert_eq!(transport.target("10.0.0.1").unwrap(), "10.0.0.1:9200");
        assert_eq!(transport.target("10.0.0.1:80").unwrap(), "10.0.0.1:80");
        assert_eq!(transport.target("::1").unwrap(), "[::1]:9200");
        assert_eq!(transport.target("search.local").unwrap(), "search.local:9200");
        assert_eq!(transport.target("search.local:7000").unwrap(), "search.local:7000");
    }

    #[test]
    fn target_without_port_is_rejected() {
        let transport = TcpTransport::new(None);
        let err = transport.target("10.0.0.1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(transport.target("10.0.0.1:443").is_ok());
    }

    #[tokio::test]
    async fn probe_detects_closed_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let transport = TcpTransport::new(None);
        let dial = tokio::spawn(async move { transport.dial(&addr.to_string()).await });
        let (server_side, _) = listener.accept().await.unwrap();
        let raw = dial.await.unwrap().unwrap();

        let capability = TcpCapability;
        let handle = capability.new_client(raw).await.unwrap();
        assert_eq!(handle.peer_addr(), addr);
        assert!(capability.probe(&handle).await.is_ok());

        drop(server_side);

        let mut dead = false;
        for _ in 0..50 {
            if capability.probe(&handle).await.is_err() {
                dead = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(dead, "probe should fail once the peer closes");
    }

    #[tokio::test]
    async fn dial_refused_reports_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = TcpTransport::new(None);
        assert!(transport.dial(&addr.to_string()).await.is_err());
    }
}
