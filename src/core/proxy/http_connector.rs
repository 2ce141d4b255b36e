//! HTTP proxy connector implementation
//!
//! Implements the HTTP CONNECT tunnel (RFC 7231 §4.3.6). The first CONNECT is
//! sent without credentials; a `407` challenge is answered by the configured
//! [`BasicProxyAuthenticator`] with a second CONNECT on a fresh connection.

use super::config::{ProxyConfig, ProxyScheme};
use super::errors::ProxyError;
use super::socks5_protocol::TunnelTarget;
use super::{connect_tcp, effective_timeout, ProxyConnector, ProxyStream};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::{Duration, Instant};

/// Upper bound on the CONNECT response head
const MAX_RESPONSE_HEAD: usize = 16 * 1024;

/// Answers `407 Proxy Authentication Required` with Basic credentials
#[derive(Clone)]
pub struct BasicProxyAuthenticator {
    header_value: String,
}

impl BasicProxyAuthenticator {
    pub fn new(username: &str, password: &str) -> Self {
        let encoded = STANDARD.encode(format!("{username}:{password}").as_bytes());
        Self {
            header_value: format!("Basic {encoded}"),
        }
    }

    /// `Proxy-Authorization` value to retry with, or `None` when the request
    /// already carried credentials (the proxy rejected them).
    pub fn authenticate(&self, response: &ConnectResponse, already_sent: bool) -> Option<&str> {
        if response.status != 407 || already_sent {
            return None;
        }
        if let Some(challenge) = response.header("proxy-authenticate") {
            if !challenge.trim_start().to_ascii_lowercase().starts_with("basic") {
                tracing::debug!(challenge = %challenge, "Proxy offered non-Basic challenge, trying Basic anyway");
            }
        }
        Some(&self.header_value)
    }
}

impl std::fmt::Debug for BasicProxyAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BasicProxyAuthenticator(***)")
    }
}

/// Status line and headers of a CONNECT response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
}

impl ConnectResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parse the response head (everything before the blank line)
    pub fn parse(head: &str) -> Result<Self, ProxyError> {
        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap_or_default();
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/") {
            return Err(ProxyError::protocol(format!(
                "Invalid proxy response: {}",
                status_line.trim()
            )));
        }
        let status = parts
            .next()
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| {
                ProxyError::protocol(format!("Invalid status code in response: {}", status_line.trim()))
            })?;
        let reason = parts.next().unwrap_or_default().trim().to_string();

        let headers = lines
            .filter(|l| !l.is_empty())
            .filter_map(|l| l.split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();

        Ok(Self {
            status,
            reason,
            headers,
        })
    }
}

/// HTTP proxy connector using CONNECT tunnel method
pub struct HttpProxyConnector {
    proxy_host: String,
    proxy_port: u16,
    authenticator: Option<BasicProxyAuthenticator>,
}

impl HttpProxyConnector {
    pub fn new(
        proxy_host: impl Into<String>,
        proxy_port: u16,
        authenticator: Option<BasicProxyAuthenticator>,
    ) -> Self {
        Self {
            proxy_host: proxy_host.into(),
            proxy_port,
            authenticator,
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Result<Self, ProxyError> {
        if config.scheme() != ProxyScheme::Http {
            return Err(ProxyError::config(format!(
                "Expected http descriptor, got {}",
                config.scheme()
            )));
        }
        let authenticator = config
            .has_credentials()
            .then(|| BasicProxyAuthenticator::new(config.username(), config.password()));
        Ok(Self::new(config.host(), config.port(), authenticator))
    }

    pub fn has_authenticator(&self) -> bool {
        self.authenticator.is_some()
    }

    /// Build the CONNECT request head
    pub fn build_connect_request(target: &TunnelTarget, proxy_authorization: Option<&str>) -> String {
        let authority = target.to_string();
        let mut request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
        if let Some(auth) = proxy_authorization {
            request.push_str(&format!("Proxy-Authorization: {auth}\r\n"));
        }
        request.push_str("Proxy-Connection: Keep-Alive\r\n\r\n");
        request
    }

    fn open(&self, timeout: Duration) -> Result<TcpStream, ProxyError> {
        let stream = connect_tcp(&self.proxy_host, self.proxy_port, timeout)?;
        stream
            .set_read_timeout(Some(timeout))
            .and_then(|_| stream.set_write_timeout(Some(timeout)))
            .map_err(|e| ProxyError::io(format!("Failed to set handshake timeout: {e}"), e))?;
        Ok(stream)
    }

    /// Send CONNECT and read the response head
    fn send_connect_request<S: Read + Write>(
        stream: &mut S,
        target: &TunnelTarget,
        proxy_authorization: Option<&str>,
    ) -> Result<ConnectResponse, ProxyError> {
        let request = Self::build_connect_request(target, proxy_authorization);
        tracing::debug!(
            target.host = %target.host,
            target.port = target.port,
            with_auth = proxy_authorization.is_some(),
            "Sending CONNECT request"
        );
        stream
            .write_all(request.as_bytes())
            .and_then(|_| stream.flush())
            .map_err(|e| ProxyError::io(format!("Failed to send CONNECT request: {e}"), e))?;

        let head = read_response_head(stream)?;
        let response = ConnectResponse::parse(&head)?;
        tracing::debug!(status = response.status, "Received proxy response");
        Ok(response)
    }
}

// 逐字节读取，避免把隧道数据读进缓冲区
fn read_response_head<S: Read>(stream: &mut S) -> Result<String, ProxyError> {
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err(ProxyError::protocol("Proxy response head too large"));
        }
        match stream.read(&mut byte) {
            Ok(0) => {
                return Err(ProxyError::protocol("Proxy closed connection during CONNECT"));
            }
            Ok(_) => head.push(byte[0]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(ProxyError::io(format!("Failed to read proxy response: {e}"), e));
            }
        }
    }
    head.truncate(head.len() - 4);
    String::from_utf8(head).map_err(|_| ProxyError::protocol("Proxy response is not valid UTF-8"))
}

impl ProxyConnector for HttpProxyConnector {
    fn connect(
        &self,
        target: &TunnelTarget,
        timeout: Duration,
    ) -> Result<Box<dyn ProxyStream>, ProxyError> {
        let start_time = Instant::now();
        let timeout = effective_timeout(timeout);

        tracing::debug!(
            proxy.type = "http",
            proxy.host = %self.proxy_host,
            proxy.port = self.proxy_port,
            target.host = %target.host,
            target.port = target.port,
            "Connecting through HTTP proxy"
        );

        let mut authorization: Option<&str> = None;
        loop {
            let mut stream = self.open(timeout)?;
            let response = match Self::send_connect_request(&mut stream, target, authorization) {
                Ok(r) => r,
                Err(e) => {
                    let _ = stream.shutdown(Shutdown::Both);
                    tracing::warn!(
                        error = %e,
                        error_category = e.category(),
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "CONNECT request failed"
                    );
                    return Err(e);
                }
            };

            match response.status {
                200..=299 => {
                    stream
                        .set_read_timeout(None)
                        .and_then(|_| stream.set_write_timeout(None))
                        .map_err(|e| ProxyError::io(format!("Failed to reset timeout: {e}"), e))?;
                    tracing::info!(
                        proxy.type = "http",
                        target.host = %target.host,
                        target.port = target.port,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "HTTP proxy tunnel established successfully"
                    );
                    return Ok(Box::new(stream));
                }
                407 => {
                    let _ = stream.shutdown(Shutdown::Both);
                    let retry = self
                        .authenticator
                        .as_ref()
                        .and_then(|a| a.authenticate(&response, authorization.is_some()));
                    match retry {
                        Some(value) => {
                            tracing::debug!("Proxy requested authentication, retrying with Basic credentials");
                            authorization = Some(value);
                        }
                        None => {
                            tracing::warn!("Proxy authentication required (407)");
                            return Err(ProxyError::auth("Proxy authentication required (407)"));
                        }
                    }
                }
                502 => {
                    let _ = stream.shutdown(Shutdown::Both);
                    tracing::warn!("Proxy cannot reach target (502 Bad Gateway)");
                    return Err(ProxyError::protocol(
                        "Bad gateway (502) - proxy cannot reach target",
                    ));
                }
                status => {
                    let _ = stream.shutdown(Shutdown::Both);
                    tracing::warn!(status, "Proxy returned error status");
                    return Err(ProxyError::protocol(format!(
                        "Proxy returned error status: {status} {}",
                        response.reason
                    )));
                }
            }
        }
    }

    fn proxy_type(&self) -> &str {
        "http"
    }
}
