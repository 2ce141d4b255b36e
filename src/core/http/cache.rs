//! Per-descriptor client registry
//!
//! One prepared [`HttpClient`] per distinct (trimmed) proxy descriptor, built
//! lazily on first use and kept for the lifetime of the cache. A blank
//! descriptor maps to a single shared direct client.

use std::io;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;

use crate::core::config::model::AppConfig;
use crate::core::proxy::{build_connector, classify, parse_descriptor, ProxyError};

use super::client::HttpClient;
use super::types::{HttpRequestInput, HttpResponseOutput};

pub struct ProxyClientCache {
    cfg: AppConfig,
    default_client: OnceCell<Arc<HttpClient>>,
    clients: DashMap<String, Arc<HttpClient>>,
}

impl ProxyClientCache {
    pub fn new(cfg: AppConfig) -> Self {
        Self {
            cfg,
            default_client: OnceCell::new(),
            clients: DashMap::new(),
        }
    }

    /// Shared unproxied client; built once
    pub fn default_client(&self) -> Arc<HttpClient> {
        self.default_client
            .get_or_init(|| Arc::new(HttpClient::direct(self.cfg.clone())))
            .clone()
    }

    /// Client for `descriptor`. Malformed descriptors are reported and never cached.
    pub fn get(&self, descriptor: Option<&str>) -> Result<Arc<HttpClient>, ProxyError> {
        let key = match descriptor.map(str::trim) {
            Some(k) if !k.is_empty() => k,
            _ => return Ok(self.default_client()),
        };

        if let Some(client) = self.clients.get(key) {
            return Ok(client.value().clone());
        }

        let Some(config) = parse_descriptor(Some(key))? else {
            return Ok(self.default_client());
        };
        let connector = build_connector(Some(&config))?;
        let client = Arc::new(HttpClient::new(self.cfg.clone(), connector));

        // 并发构建时后写入者覆盖先写入者
        self.clients.insert(key.to_string(), client.clone());
        tracing::debug!(
            proxy.type = client.proxy_type(),
            proxy.url = %config.sanitized_url(),
            cached = self.clients.len(),
            "Proxy client created"
        );
        Ok(client)
    }

    /// Resolve the client and send, with every failure classified
    pub fn fetch(
        &self,
        descriptor: Option<&str>,
        input: HttpRequestInput,
    ) -> io::Result<HttpResponseOutput> {
        let client = self
            .get(descriptor)
            .map_err(|e| classify(anyhow::Error::from(e)))?;
        client.send(input)
    }

    /// Number of cached proxied clients (the default client is not counted)
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_descriptors_share_default() {
        let cache = ProxyClientCache::new(AppConfig::default());
        let a = cache.get(None).unwrap();
        let b = cache.get(Some("")).unwrap();
        let c = cache.get(Some("   ")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(a.proxy_type(), "direct");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_same_descriptor_same_client() {
        let cache = ProxyClientCache::new(AppConfig::default());
        let a = cache.get(Some("socks5://127.0.0.1:1080")).unwrap();
        let b = cache.get(Some("  socks5://127.0.0.1:1080 ")).unwrap();
        let c = cache.get(Some("socks5://127.0.0.1:1081")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_config_error_not_cached() {
        let cache = ProxyClientCache::new(AppConfig::default());
        let err = cache.get(Some("socks4://u:p@127.0.0.1:1080")).err().unwrap();
        assert!(err.to_string().starts_with("PROXY_CONFIG_ERROR"));
        assert!(cache.is_empty());
    }
}
