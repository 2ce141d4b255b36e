use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingInfo { pub connect_ms: u32, pub tls_ms: u32, pub first_byte_ms: u32, pub total_ms: u32 }

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectInfo { pub status: u16, pub location: String, pub count: u8 }

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestInput {
  pub url: String,
  #[serde(default = "default_method")]
  pub method: String,
  #[serde(default)]
  pub headers: HashMap<String, String>,
  #[serde(default)]
  pub body_base64: Option<String>,
  /// 0 表示使用配置中的连接超时
  #[serde(default)]
  pub timeout_ms: u64,
  #[serde(default = "default_true")]
  pub follow_redirects: bool,
  #[serde(default = "default_max_redirects")]
  pub max_redirects: u8,
}

fn default_method() -> String { "GET".to_string() }
fn default_true() -> bool { true }
fn default_max_redirects() -> u8 { 5 }

impl HttpRequestInput {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      method: default_method(),
      headers: HashMap::new(),
      body_base64: None,
      timeout_ms: 0,
      follow_redirects: true,
      max_redirects: default_max_redirects(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponseOutput {
  pub ok: bool,
  pub status: u16,
  pub headers: HashMap<String, String>,
  pub body_base64: String,
  /// 实际连接的对端地址（经代理时为代理地址）
  pub ip: Option<String>,
  pub proxy_type: String,
  pub timing: TimingInfo,
  pub redirects: Vec<RedirectInfo>,
  pub body_size: usize,
}
