//! SOCKS4/SOCKS4a proxy connector
//!
//! Request: `VER(0x04) | CMD(0x01) | DSTPORT | DSTIP | USERID\0 [| HOST\0]`.
//! Hostnames are sent SOCKS4a style (`DSTIP = 0.0.0.1`) so resolution happens
//! on the proxy. SOCKS4 carries no credentials; the user id is always empty.

use super::config::{ProxyConfig, ProxyScheme};
use super::errors::ProxyError;
use super::socks5_protocol::{TargetAddr, TunnelTarget};
use super::{connect_tcp, effective_timeout, ProxyConnector, ProxyStream};
use std::io::{self, Read, Write};
use std::net::{IpAddr, Shutdown};
use std::time::{Duration, Instant};

const SOCKS4_VERSION: u8 = 0x04;
const CMD_CONNECT: u8 = 0x01;
const REPLY_VERSION: u8 = 0x00;
const REP_GRANTED: u8 = 0x5A;

/// SOCKS4a connector
pub struct Socks4ProxyConnector {
    proxy_host: String,
    proxy_port: u16,
}

impl Socks4ProxyConnector {
    pub fn new(proxy_host: impl Into<String>, proxy_port: u16) -> Self {
        Self {
            proxy_host: proxy_host.into(),
            proxy_port,
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Result<Self, ProxyError> {
        if config.scheme() != ProxyScheme::Socks4 {
            return Err(ProxyError::config(format!(
                "Expected socks4 descriptor, got {}",
                config.scheme()
            )));
        }
        Ok(Self::new(config.host(), config.port()))
    }

    /// Build the CONNECT request. IPv6 literals cannot be expressed in SOCKS4.
    pub fn build_request(target: &TunnelTarget) -> Result<Vec<u8>, ProxyError> {
        if target.port == 0 {
            return Err(ProxyError::protocol("SOCKS4 invalid target port: 0"));
        }

        let mut request = vec![SOCKS4_VERSION, CMD_CONNECT];
        request.extend_from_slice(&target.port.to_be_bytes());
        match target.addr() {
            TargetAddr::Ip(IpAddr::V4(ipv4)) => {
                request.extend_from_slice(&ipv4.octets());
                request.push(0x00); // empty USERID
            }
            TargetAddr::Ip(IpAddr::V6(_)) => {
                return Err(ProxyError::protocol(format!(
                    "SOCKS4 cannot address IPv6 target {target}"
                )));
            }
            TargetAddr::Domain(domain) => {
                if domain.is_empty() || domain.contains('\0') {
                    return Err(ProxyError::protocol(format!(
                        "SOCKS4 invalid target host '{domain}'"
                    )));
                }
                request.extend_from_slice(&[0, 0, 0, 1]);
                request.push(0x00);
                request.extend_from_slice(domain.as_bytes());
                request.push(0x00);
            }
        }
        Ok(request)
    }

    fn handshake<S: Read + Write>(stream: &mut S, target: &TunnelTarget) -> Result<(), ProxyError> {
        let request = Self::build_request(target)?;
        stream
            .write_all(&request)
            .and_then(|_| stream.flush())
            .map_err(|e| ProxyError::io(format!("Failed to send SOCKS4 request: {e}"), e))?;

        // VN | CD | DSTPORT | DSTIP
        let mut reply = [0u8; 8];
        stream.read_exact(&mut reply).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                ProxyError::protocol("SOCKS4 incomplete reply")
            } else {
                ProxyError::io(format!("Failed to read SOCKS4 reply: {e}"), e)
            }
        })?;

        if reply[0] != REPLY_VERSION {
            return Err(ProxyError::protocol(format!(
                "SOCKS4 invalid reply version 0x{:02x}",
                reply[0]
            )));
        }
        match reply[1] {
            REP_GRANTED => Ok(()),
            0x5B => Err(ProxyError::protocol("SOCKS4 request rejected or failed")),
            0x5C => Err(ProxyError::protocol(
                "SOCKS4 request rejected: proxy cannot reach identd on client",
            )),
            0x5D => Err(ProxyError::protocol(
                "SOCKS4 request rejected: identd reported different user id",
            )),
            other => Err(ProxyError::protocol(format!(
                "SOCKS4 unknown reply code 0x{other:02x}"
            ))),
        }
    }
}

impl ProxyConnector for Socks4ProxyConnector {
    fn connect(
        &self,
        target: &TunnelTarget,
        timeout: Duration,
    ) -> Result<Box<dyn ProxyStream>, ProxyError> {
        let start = Instant::now();
        let timeout = effective_timeout(timeout);
        tracing::debug!(
            proxy.type = "socks4",
            proxy.host = %self.proxy_host,
            proxy.port = self.proxy_port,
            target.host = %target.host,
            target.port = target.port,
            "Connecting through SOCKS4 proxy"
        );

        let mut stream = connect_tcp(&self.proxy_host, self.proxy_port, timeout)?;
        stream
            .set_read_timeout(Some(timeout))
            .and_then(|_| stream.set_write_timeout(Some(timeout)))
            .map_err(|e| ProxyError::io(format!("Failed to set handshake timeout: {e}"), e))?;

        if let Err(e) = Self::handshake(&mut stream, target) {
            let _ = stream.shutdown(Shutdown::Both);
            tracing::warn!(
                error = %e,
                error_category = e.category(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "SOCKS4 handshake failed"
            );
            return Err(e);
        }

        stream
            .set_read_timeout(None)
            .and_then(|_| stream.set_write_timeout(None))
            .map_err(|e| ProxyError::io(format!("Failed to reset timeout: {e}"), e))?;

        tracing::info!(
            proxy.type = "socks4",
            target.host = %target.host,
            target.port = target.port,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "SOCKS4 tunnel established successfully"
        );
        Ok(Box::new(stream))
    }

    fn proxy_type(&self) -> &str {
        "socks4"
    }
}
