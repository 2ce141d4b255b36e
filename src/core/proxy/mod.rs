//! Proxy module for routing outbound connections through HTTP/SOCKS4/SOCKS5 proxies
//!
//! This module provides:
//! - Descriptor parsing (`scheme://[user:pass@]host:port`)
//! - A hand-rolled SOCKS5 client and the `TunnelSocket` that drives it
//! - Connector implementations behind the `ProxyConnector` trait
//! - Error classification at the request boundary

pub mod classifier;
pub mod config;
pub mod errors;
pub mod factory;
pub mod http_connector;
pub mod socks4_connector;
pub mod socks5_connector;
pub mod socks5_protocol;
pub mod tunnel_socket;

pub use classifier::{classify, is_auth_failure, is_config_error};
pub use config::{parse_descriptor, ProxyConfig, ProxyScheme, Socks5Auth};
pub use errors::{ProxyError, ProxyErrorKind};
pub use factory::build_connector;
pub use http_connector::{BasicProxyAuthenticator, HttpProxyConnector};
pub use socks4_connector::Socks4ProxyConnector;
pub use socks5_connector::Socks5TunnelConnector;
pub use socks5_protocol::TunnelTarget;
pub use tunnel_socket::{TunnelSocket, DEFAULT_HANDSHAKE_TIMEOUT_MS};

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

/// Byte stream returned by a connector, ready for application data
pub trait ProxyStream: Read + Write + Send {
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()>;

    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()>;

    /// Address of the directly connected peer (the proxy, when tunneled)
    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Shut down both directions
    fn shutdown(&self) -> io::Result<()>;
}

impl ProxyStream for TcpStream {
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, dur)
    }

    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, dur)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

impl ProxyStream for TunnelSocket {
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        TunnelSocket::set_read_timeout(self, dur)
    }

    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        TunnelSocket::set_write_timeout(self, dur)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TunnelSocket::peer_addr(self)
    }

    fn shutdown(&self) -> io::Result<()> {
        self.close()
    }
}

/// Trait for proxy connectors
///
/// Each call opens a fresh connection; connectors hold no per-connection state.
pub trait ProxyConnector: Send + Sync {
    /// Connect to the target through the proxy.
    ///
    /// A zero `timeout` selects the default handshake deadline.
    fn connect(
        &self,
        target: &TunnelTarget,
        timeout: Duration,
    ) -> Result<Box<dyn ProxyStream>, ProxyError>;

    /// Get the proxy type name for logging
    fn proxy_type(&self) -> &str;
}

/// Connector used when no proxy is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectConnector;

impl ProxyConnector for DirectConnector {
    fn connect(
        &self,
        target: &TunnelTarget,
        timeout: Duration,
    ) -> Result<Box<dyn ProxyStream>, ProxyError> {
        let host = target.host.trim_start_matches('[').trim_end_matches(']');
        let stream = connect_tcp(host, target.port, effective_timeout(timeout))?;
        tracing::debug!(
            target.host = %target.host,
            target.port = target.port,
            "Direct connection established"
        );
        Ok(Box::new(stream))
    }

    fn proxy_type(&self) -> &str {
        "direct"
    }
}

pub(crate) fn effective_timeout(timeout: Duration) -> Duration {
    if timeout.is_zero() {
        Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS)
    } else {
        timeout
    }
}

/// Resolve `host:port` and connect to the first reachable address.
pub(crate) fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, ProxyError> {
    let start = Instant::now();
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| ProxyError::io(format!("Failed to resolve address '{host}:{port}': {e}"), e))?
        .collect();

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::debug!(addr = %addr, error = %e, "Address unreachable");
                last_err = Some(e);
            }
        }
    }

    let err = last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("no addresses resolved for {host}"))
    });
    tracing::warn!(
        host = %host,
        port = port,
        error = %err,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "TCP connect failed"
    );
    Err(ProxyError::io(format!("Failed to connect to {host}:{port}: {err}"), err))
}
