//! SOCKS5 代理连接器
//!
//! 每次连接创建一个新的 [`TunnelSocket`]，握手完成后才把它交给调用方。
//! 连接器本身只保存代理地址和（可选的）认证信息，不持有任何连接状态。

use super::config::{self, ProxyConfig, ProxyScheme, Socks5Auth};
use super::errors::ProxyError;
use super::socks5_protocol::TunnelTarget;
use super::tunnel_socket::TunnelSocket;
use super::{ProxyConnector, ProxyStream};
use std::time::Duration;

/// SOCKS5 代理连接器
///
/// 绕过其他任何代理机制，直接通过 `TunnelSocket` 建立隧道
pub struct Socks5TunnelConnector {
    proxy_host: String,
    proxy_port: u16,
    auth: Option<Socks5Auth>,
}

impl Socks5TunnelConnector {
    pub fn new(proxy_host: impl Into<String>, proxy_port: u16, auth: Option<Socks5Auth>) -> Self {
        Self {
            proxy_host: proxy_host.into(),
            proxy_port,
            auth,
        }
    }

    /// 从解析后的描述符构建；凭证在这里完成长度校验
    pub fn from_config(config: &ProxyConfig) -> Result<Self, ProxyError> {
        if config.scheme() != ProxyScheme::Socks5 {
            return Err(ProxyError::config(format!(
                "Expected socks5 descriptor, got {}",
                config.scheme()
            )));
        }
        Ok(Self::new(config.host(), config.port(), config.socks5_auth()?))
    }

    /// 获取脱敏的代理 URL（隐藏凭证）
    pub fn sanitized_url(&self) -> String {
        config::sanitized_url(ProxyScheme::Socks5, &self.proxy_host, self.proxy_port, self.has_auth())
    }

    pub fn has_auth(&self) -> bool {
        self.auth.is_some()
    }
}

impl ProxyConnector for Socks5TunnelConnector {
    fn connect(
        &self,
        target: &TunnelTarget,
        timeout: Duration,
    ) -> Result<Box<dyn ProxyStream>, ProxyError> {
        tracing::debug!(
            proxy.url = %self.sanitized_url(),
            proxy.type = "socks5",
            target.host = %target.host,
            target.port = target.port,
            "Connecting through SOCKS5 proxy"
        );

        let socket = TunnelSocket::new(self.proxy_host.clone(), self.proxy_port, self.auth.clone());
        // 0 表示使用默认握手超时
        socket.connect(target, timeout.as_millis().min(u64::MAX as u128) as u64)?;
        Ok(Box::new(socket))
    }

    fn proxy_type(&self) -> &str {
        "socks5"
    }
}
