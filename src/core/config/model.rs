use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpCfg {
    #[serde(default = "default_connect_timeout_ms")] pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")] pub read_timeout_ms: u64,
    #[serde(default = "default_user_agent")] pub user_agent: String,
    #[serde(default = "default_true")] pub follow_redirects: bool,
    #[serde(default = "default_max_redirects")] pub max_redirects: u8,
    #[serde(default = "default_large_body_warn")] pub large_body_warn_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsCfg {
    /// 跳过证书链与主机名校验，仅用于调试
    #[serde(default)] pub insecure_skip_verify: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyCfg {
    /// `scheme://[user:pass@]host:port`；为空表示直连
    #[serde(default)] pub descriptor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingCfg {
    #[serde(default = "default_log_level")] pub log_level: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)] pub http: HttpCfg,
    #[serde(default)] pub tls: TlsCfg,
    #[serde(default)] pub proxy: ProxyCfg,
    #[serde(default)] pub logging: LoggingCfg,
}

fn default_true() -> bool { true }
fn default_connect_timeout_ms() -> u64 { 15_000 }
fn default_read_timeout_ms() -> u64 { 30_000 }
fn default_user_agent() -> String { format!("proxy-tunnel/{}", env!("CARGO_PKG_VERSION")) }
fn default_max_redirects() -> u8 { 5 }
fn default_large_body_warn() -> u64 { 5 * 1024 * 1024 }
fn default_log_level() -> String { "info".to_string() }

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            user_agent: default_user_agent(),
            follow_redirects: default_true(),
            max_redirects: default_max_redirects(),
            large_body_warn_bytes: default_large_body_warn(),
        }
    }
}

impl Default for LoggingCfg {
    fn default() -> Self {
        Self { log_level: default_log_level() }
    }
}
