//! Connector selection from a parsed descriptor

use super::config::{ProxyConfig, ProxyScheme};
use super::errors::ProxyError;
use super::http_connector::HttpProxyConnector;
use super::socks4_connector::Socks4ProxyConnector;
use super::socks5_connector::Socks5TunnelConnector;
use super::{DirectConnector, ProxyConnector};
use std::sync::Arc;

/// Pick the connector for `config`; `None` yields a direct connector.
///
/// SOCKS5 credentials are validated here, so an over-long username surfaces
/// as a config error before any socket is opened.
pub fn build_connector(config: Option<&ProxyConfig>) -> Result<Arc<dyn ProxyConnector>, ProxyError> {
    let Some(config) = config else {
        return Ok(Arc::new(DirectConnector));
    };

    let connector: Arc<dyn ProxyConnector> = match config.scheme() {
        ProxyScheme::Http => Arc::new(HttpProxyConnector::from_config(config)?),
        ProxyScheme::Socks4 => Arc::new(Socks4ProxyConnector::from_config(config)?),
        ProxyScheme::Socks5 => Arc::new(Socks5TunnelConnector::from_config(config)?),
    };

    tracing::debug!(
        proxy.type = connector.proxy_type(),
        proxy.url = %config.sanitized_url(),
        "Proxy connector created"
    );
    Ok(connector)
}
