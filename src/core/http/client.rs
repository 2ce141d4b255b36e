use std::{
    collections::HashMap,
    io::{self, Read, Write},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rustls::{ClientConfig, ClientConnection, StreamOwned};
use url::{Position, Url};

use crate::core::config::model::AppConfig;
use crate::core::proxy::{classify, DirectConnector, ProxyConnector, ProxyStream, TunnelTarget};
use crate::core::tls::verifier::{create_client_config, server_name_for};

use super::response::{ParsedResponse, ResponseReader};
use super::types::{HttpRequestInput, HttpResponseOutput, RedirectInfo, TimingInfo};

/// 阻塞式 HTTP/1.1 客户端：每个请求经绑定的 connector 新建连接，`Connection: close`
pub struct HttpClient {
    cfg: AppConfig,
    connector: Arc<dyn ProxyConnector>,
    tls_default: Arc<ClientConfig>,
}

/// 单次往返的结果
struct Exchange {
    response: ParsedResponse,
    timing: TimingInfo,
    peer: Option<String>,
}

/// 记录首字节到达时间
struct FirstByteTimer<'a, R: Read> {
    inner: &'a mut R,
    start: Instant,
    first_byte: Option<Duration>,
}

impl<R: Read> Read for FirstByteTimer<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 && self.first_byte.is_none() {
            self.first_byte = Some(self.start.elapsed());
        }
        Ok(n)
    }
}

impl HttpClient {
    pub fn new(cfg: AppConfig, connector: Arc<dyn ProxyConnector>) -> Self {
        let tls_cfg = Arc::new(create_client_config(&cfg.tls));
        Self {
            cfg,
            connector,
            tls_default: tls_cfg,
        }
    }

    /// 不经代理的客户端
    pub fn direct(cfg: AppConfig) -> Self {
        Self::new(cfg, Arc::new(DirectConnector))
    }

    pub fn proxy_type(&self) -> &str {
        self.connector.proxy_type()
    }

    pub fn config(&self) -> &AppConfig {
        &self.cfg
    }

    /// 是否需要大响应警告
    pub fn should_warn_large_body(&self, body_size: usize) -> bool {
        (body_size as u64) > self.cfg.http.large_body_warn_bytes
    }

    /// 发送请求；所有失败都经过 [`classify`] 统一为 `io::Error`
    pub fn send(&self, input: HttpRequestInput) -> io::Result<HttpResponseOutput> {
        self.send_inner(input).map_err(classify)
    }

    fn send_inner(&self, input: HttpRequestInput) -> Result<HttpResponseOutput> {
        let mut url = Url::parse(&input.url).context("invalid URL")?;
        let mut method = input.method.trim().to_ascii_uppercase();
        if method.is_empty() || !method.bytes().all(|b| b.is_ascii_alphabetic()) {
            bail!("invalid HTTP method: {}", input.method);
        }

        // 先解码 body（若无效可在未触网前失败）
        let mut body: Vec<u8> = match &input.body_base64 {
            Some(b64) => BASE64.decode(b64).context("decode bodyBase64")?,
            None => Vec::new(),
        };
        validate_headers(&input.headers)?;

        let timeout = Duration::from_millis(if input.timeout_ms > 0 {
            input.timeout_ms
        } else {
            self.cfg.http.connect_timeout_ms
        });
        let follow = input.follow_redirects && self.cfg.http.follow_redirects;
        let start_total = Instant::now();
        let mut redirects: Vec<RedirectInfo> = Vec::new();

        let exchange = loop {
            let exchange = self.send_once(&method, &url, &input.headers, &body, timeout)?;
            let status = exchange.response.status;
            let location = exchange.response.header("location").map(str::to_string);

            match (follow && is_redirect(status), location) {
                (true, Some(location)) => {
                    if redirects.len() >= input.max_redirects as usize {
                        bail!("too many redirects (max {})", input.max_redirects);
                    }
                    let next = url
                        .join(&location)
                        .with_context(|| format!("invalid redirect location: {location}"))?;
                    if status == 303 && method != "HEAD" {
                        method = "GET".to_string();
                        body.clear();
                    }
                    redirects.push(RedirectInfo {
                        status,
                        location: next.to_string(),
                        count: (redirects.len() + 1) as u8,
                    });
                    tracing::debug!(target = "http", status, location = %next, "following redirect");
                    url = next;
                }
                _ => break exchange,
            }
        };

        let Exchange {
            response,
            mut timing,
            peer,
        } = exchange;
        timing.total_ms = start_total.elapsed().as_millis() as u32;

        let body_size = response.body.len();
        if self.should_warn_large_body(body_size) {
            tracing::warn!(target = "http", size = body_size, "large body warning");
        }

        let mut headers: HashMap<String, String> = HashMap::new();
        for (k, v) in &response.headers {
            headers
                .entry(k.clone())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(v);
                })
                .or_insert_with(|| v.clone());
        }

        tracing::info!(
            target = "http",
            status = response.status,
            proxy.type = self.proxy_type(),
            redirects = redirects.len(),
            total_ms = timing.total_ms,
            "http request completed"
        );

        Ok(HttpResponseOutput {
            ok: (200..300).contains(&response.status),
            status: response.status,
            headers,
            body_base64: BASE64.encode(&response.body),
            ip: peer,
            proxy_type: self.proxy_type().to_string(),
            timing,
            redirects,
            body_size,
        })
    }

    fn send_once(
        &self,
        method: &str,
        url: &Url,
        headers: &HashMap<String, String>,
        body: &[u8],
        timeout: Duration,
    ) -> Result<Exchange> {
        let https = match url.scheme() {
            "https" => true,
            "http" => false,
            other => bail!("unsupported URL scheme: {other}"),
        };
        let host = url.host_str().ok_or_else(|| anyhow!("url host missing"))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| anyhow!("url port missing"))?;
        let target = TunnelTarget::new(host, port);

        let start_connect = Instant::now();
        let stream = self
            .connector
            .connect(&target, timeout)
            .with_context(|| format!("connect {target} via {}", self.proxy_type()))?;
        let connect_ms = start_connect.elapsed().as_millis() as u32;
        let peer = stream.peer_addr().ok().map(|a| a.to_string());

        let read_timeout = match self.cfg.http.read_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        stream
            .set_read_timeout(read_timeout)
            .and_then(|_| stream.set_write_timeout(read_timeout))
            .context("set socket timeout")?;

        let head = self.build_request_head(method, url, headers, body.len());
        let head_only = method == "HEAD";

        let (response, tls_ms, first_byte_ms) = if https {
            let server_name = server_name_for(host)?;
            let start_tls = Instant::now();
            let conn = ClientConnection::new(self.tls_default.clone(), server_name)
                .context("create tls connection")?;
            let mut tls = StreamOwned::new(conn, stream);
            while tls.conn.is_handshaking() {
                tls.conn
                    .complete_io(&mut tls.sock)
                    .with_context(|| format!("tls handshake with {target}"))?;
            }
            let tls_ms = start_tls.elapsed().as_millis() as u32;
            let result = exchange(&mut tls, &head, body, head_only);
            tls.conn.send_close_notify();
            let _ = tls.conn.complete_io(&mut tls.sock);
            let _ = tls.sock.shutdown();
            let (response, first_byte_ms) = result?;
            (response, tls_ms, first_byte_ms)
        } else {
            let mut stream = stream;
            let result = exchange(&mut stream, &head, body, head_only);
            let _ = stream.shutdown();
            let (response, first_byte_ms) = result?;
            (response, 0, first_byte_ms)
        };

        Ok(Exchange {
            response,
            timing: TimingInfo {
                connect_ms,
                tls_ms,
                first_byte_ms,
                total_ms: 0,
            },
            peer,
        })
    }

    /// 构造请求头；Host / Connection / Content-Length 由客户端决定
    pub fn build_request_head(
        &self,
        method: &str,
        url: &Url,
        headers: &HashMap<String, String>,
        body_len: usize,
    ) -> String {
        let path = &url[Position::BeforePath..Position::AfterQuery];
        let path = if path.is_empty() { "/" } else { path };
        let host = match url.port() {
            Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
            None => url.host_str().unwrap_or_default().to_string(),
        };

        let mut head = format!("{method} {path} HTTP/1.1\r\nHost: {host}\r\n");
        if !headers.keys().any(|k| k.eq_ignore_ascii_case("user-agent")) {
            head.push_str(&format!("User-Agent: {}\r\n", self.cfg.http.user_agent));
        }
        let mut names: Vec<&String> = headers.keys().collect();
        names.sort();
        for name in names {
            let lower = name.to_ascii_lowercase();
            if matches!(lower.as_str(), "host" | "connection" | "content-length" | "transfer-encoding") {
                continue;
            }
            head.push_str(&format!("{}: {}\r\n", name, headers[name]));
        }
        if body_len > 0 || matches!(method, "POST" | "PUT" | "PATCH") {
            head.push_str(&format!("Content-Length: {body_len}\r\n"));
        }
        head.push_str("Connection: close\r\n\r\n");
        head
    }
}

fn exchange<S: Read + Write>(
    stream: &mut S,
    head: &str,
    body: &[u8],
    head_only: bool,
) -> Result<(ParsedResponse, u32)> {
    stream
        .write_all(head.as_bytes())
        .and_then(|_| stream.write_all(body))
        .and_then(|_| stream.flush())
        .context("write request")?;

    let mut timer = FirstByteTimer {
        inner: stream,
        start: Instant::now(),
        first_byte: None,
    };
    let response = ResponseReader::new(&mut timer)
        .read_response(head_only)
        .context("read response")?;
    let first_byte_ms = timer.first_byte.unwrap_or_default().as_millis() as u32;
    Ok((response, first_byte_ms))
}

fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

fn validate_headers(headers: &HashMap<String, String>) -> Result<()> {
    for (k, v) in headers {
        let bad_name = k.is_empty() || k.bytes().any(|b| b <= b' ' || b == b':' || b >= 0x7f);
        if bad_name {
            bail!("invalid header name: {k:?}");
        }
        if v.contains(['\r', '\n']) {
            bail!("invalid header value for {k}");
        }
    }
    Ok(())
}
