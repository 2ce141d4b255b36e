//! SOCKS5 客户端协议实现（RFC 1928 / RFC 1929 子集）
//!
//! 本模块只负责协议字节流，不关心 socket 生命周期：所有函数都作用于调用方
//! 已经建立好的 `Read + Write` 流，便于在测试中使用内存流替身。
//!
//! # SOCKS5 协议流程
//!
//! 1. 方法协商：客户端只提供一个候选方法（0x00 或 0x02），服务器确认
//! 2. 认证：服务器选择 0x02 时执行用户名/密码子协商
//! 3. 连接请求：发送 CONNECT 与目标地址/端口
//! 4. 连接响应：校验 REP 并丢弃 BND.ADDR / BND.PORT

use super::config::{validate_credential_len, Socks5Auth};
use super::errors::ProxyError;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr};

/// SOCKS5 协议版本号
pub const SOCKS5_VERSION: u8 = 0x05;

/// 认证方法：无需认证
pub const AUTH_NO_AUTH: u8 = 0x00;

/// 认证方法：用户名/密码认证
pub const AUTH_USERNAME_PASSWORD: u8 = 0x02;

/// 认证方法：无可接受的方法
pub const AUTH_NO_ACCEPTABLE: u8 = 0xFF;

/// 用户名/密码认证子协商版本
pub const AUTH_SUBNEG_VERSION: u8 = 0x01;

/// SOCKS5 命令：CONNECT
pub const CMD_CONNECT: u8 = 0x01;

/// 地址类型：IPv4
pub const ATYP_IPV4: u8 = 0x01;

/// 地址类型：域名
pub const ATYP_DOMAIN: u8 = 0x03;

/// 地址类型：IPv6
pub const ATYP_IPV6: u8 = 0x04;

/// SOCKS5 响应：成功
pub const REP_SUCCESS: u8 = 0x00;

pub const MSG_AUTH_NOT_HONORED: &str = "SOCKS5 server did not honor requested auth";
pub const MSG_AUTH_REQUIRED: &str = "SOCKS5 server requires authentication";
pub const MSG_NO_ACCEPTABLE_METHOD: &str = "SOCKS5 no acceptable authentication method";
pub const MSG_UNSUPPORTED_METHOD: &str = "SOCKS5 unsupported method returned";
pub const MSG_AUTH_FAILED: &str = "SOCKS: authentication failed";
pub const MSG_INCOMPLETE_RESPONSE: &str = "SOCKS5 incomplete handshake response";

/// Messages that mean "the proxy and we disagree about credentials".
///
/// The request-boundary classifier matches on these; keep them stable.
pub const AUTH_FAILURE_MARKERS: [&str; 5] = [
    MSG_AUTH_FAILED,
    MSG_AUTH_REQUIRED,
    MSG_NO_ACCEPTABLE_METHOD,
    MSG_UNSUPPORTED_METHOD,
    MSG_AUTH_NOT_HONORED,
];

/// Authentication method accepted during negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    NoAuth,
    UsernamePassword,
}

/// Destination requested through the tunnel.
///
/// `host` may be a hostname or a literal IPv4/IPv6 address (brackets allowed).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TunnelTarget {
    pub host: String,
    pub port: u16,
}

/// Encoded form of a [`TunnelTarget`] host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr<'a> {
    Ip(IpAddr),
    Domain(&'a str),
}

impl TunnelTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Literal addresses go out as ATYP 0x01/0x04, everything else as a domain
    pub fn addr(&self) -> TargetAddr<'_> {
        let bare = self
            .host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(&self.host);
        match bare.parse::<IpAddr>() {
            Ok(ip) => TargetAddr::Ip(ip),
            Err(_) => TargetAddr::Domain(bare),
        }
    }
}

impl From<SocketAddr> for TunnelTarget {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for TunnelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr() {
            TargetAddr::Ip(IpAddr::V6(v6)) => write!(f, "[{v6}]:{}", self.port),
            _ => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

/// 完整握手：方法协商 → （按需）用户名/密码认证 → CONNECT
///
/// 顺序固定，任何一步失败立即返回，后续步骤不会写出任何字节。
pub fn connect<S: Read + Write>(
    stream: &mut S,
    auth: Option<&Socks5Auth>,
    target: &TunnelTarget,
) -> Result<(), ProxyError> {
    let method = negotiate_method(stream, auth)?;
    if let (AuthMethod::UsernamePassword, Some(auth)) = (method, auth) {
        auth_user_pass(stream, auth)?;
    }
    send_connect(stream, target)
}

/// 方法协商
///
/// 只提供一个候选方法：有凭证时为 0x02，否则为 0x00。服务器必须确认该方法，
/// 不允许静默跳过调用方要求的认证。
pub fn negotiate_method<S: Read + Write>(
    stream: &mut S,
    auth: Option<&Socks5Auth>,
) -> Result<AuthMethod, ProxyError> {
    let method = if auth.is_some() {
        AUTH_USERNAME_PASSWORD
    } else {
        AUTH_NO_AUTH
    };

    // VER | NMETHODS | METHODS
    write_request(stream, &[SOCKS5_VERSION, 0x01, method], "method negotiation")?;

    tracing::debug!(method, "Sent SOCKS5 method negotiation");

    // VER | METHOD
    let mut response = [0u8; 2];
    read_reply(stream, &mut response, "method reply")?;

    let version = response[0];
    if version != SOCKS5_VERSION {
        return Err(ProxyError::protocol(format!(
            "SOCKS5 handshake failed: invalid version 0x{version:02x}"
        )));
    }

    let chosen = response[1];
    let accepted = match chosen {
        AUTH_NO_AUTH if auth.is_none() => AuthMethod::NoAuth,
        AUTH_NO_AUTH => return Err(ProxyError::protocol(MSG_AUTH_NOT_HONORED)),
        AUTH_USERNAME_PASSWORD if auth.is_some() => AuthMethod::UsernamePassword,
        AUTH_USERNAME_PASSWORD => return Err(ProxyError::protocol(MSG_AUTH_REQUIRED)),
        AUTH_NO_ACCEPTABLE => return Err(ProxyError::protocol(MSG_NO_ACCEPTABLE_METHOD)),
        other => {
            return Err(ProxyError::protocol(format!(
                "{MSG_UNSUPPORTED_METHOD} (0x{other:02x})"
            )))
        }
    };

    tracing::debug!(method = chosen, "SOCKS5 server accepted authentication method");
    Ok(accepted)
}

/// 用户名/密码认证（RFC 1929）
///
/// 认证失败只在这里被识别。
pub fn auth_user_pass<S: Read + Write>(stream: &mut S, auth: &Socks5Auth) -> Result<(), ProxyError> {
    // Socks5Auth 构造时已校验，这里在写出任何字节前再确认一次
    validate_credential_len("username", auth.username())?;
    validate_credential_len("password", auth.password())?;

    let username = auth.username().as_bytes();
    let password = auth.password().as_bytes();

    // VER | ULEN | UNAME | PLEN | PASSWD
    let mut request = Vec::with_capacity(3 + username.len() + password.len());
    request.push(AUTH_SUBNEG_VERSION);
    request.push(username.len() as u8);
    request.extend_from_slice(username);
    request.push(password.len() as u8);
    request.extend_from_slice(password);

    write_request(stream, &request, "authentication")?;

    tracing::debug!(username_len = username.len(), "Sent username/password authentication");

    // VER | STATUS，部分服务器回显 0x05 作为版本，因此不校验首字节
    let mut response = [0u8; 2];
    read_reply(stream, &mut response, "authentication reply")?;

    if response[1] != 0x00 {
        tracing::debug!(status = response[1], "SOCKS5 authentication rejected");
        return Err(ProxyError::auth(MSG_AUTH_FAILED));
    }

    tracing::debug!("Username/password authentication successful");
    Ok(())
}

/// 发送 CONNECT 并解析响应
pub fn send_connect<S: Read + Write>(stream: &mut S, target: &TunnelTarget) -> Result<(), ProxyError> {
    let request = build_connect_request(target)?;
    write_request(stream, &request, "connect request")?;

    tracing::debug!(
        target.host = %target.host,
        target.port = target.port,
        "Sent SOCKS5 connect request"
    );

    read_connect_reply(stream)
}

/// 构造 CONNECT 请求: VER | CMD | RSV | ATYP | DST.ADDR | DST.PORT
///
/// 校验在写出任何字节之前完成。
pub fn build_connect_request(target: &TunnelTarget) -> Result<Vec<u8>, ProxyError> {
    if target.port == 0 {
        return Err(ProxyError::protocol(format!(
            "SOCKS5 invalid target port: {}",
            target.port
        )));
    }

    let mut request = vec![SOCKS5_VERSION, CMD_CONNECT, 0x00];
    match target.addr() {
        TargetAddr::Ip(IpAddr::V4(ipv4)) => {
            request.push(ATYP_IPV4);
            request.extend_from_slice(&ipv4.octets());
        }
        TargetAddr::Ip(IpAddr::V6(ipv6)) => {
            request.push(ATYP_IPV6);
            request.extend_from_slice(&ipv6.octets());
        }
        TargetAddr::Domain(domain) => {
            let bytes = domain.as_bytes();
            if bytes.is_empty() || bytes.len() > 255 {
                return Err(ProxyError::protocol(format!(
                    "SOCKS5 invalid domain length: {} bytes (must be 1..255)",
                    bytes.len()
                )));
            }
            request.push(ATYP_DOMAIN);
            request.push(bytes.len() as u8);
            request.extend_from_slice(bytes);
        }
    }
    // 端口（大端序）
    request.extend_from_slice(&target.port.to_be_bytes());
    Ok(request)
}

fn read_connect_reply<S: Read>(stream: &mut S) -> Result<(), ProxyError> {
    // VER | REP | RSV | ATYP
    let mut header = [0u8; 4];
    read_reply(stream, &mut header, "connect reply")?;

    let version = header[0];
    if version != SOCKS5_VERSION {
        return Err(ProxyError::protocol(format!(
            "SOCKS5 CONNECT failed: invalid version 0x{version:02x}"
        )));
    }

    let rep = header[1];
    if rep != REP_SUCCESS {
        return Err(ProxyError::protocol(format!(
            "SOCKS5 CONNECT failed: {}",
            reply_message(rep)
        )));
    }

    // BND.ADDR 不使用，但必须读走
    let addr_len = match header[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            read_reply(stream, &mut len, "bound domain length")?;
            len[0] as usize
        }
        other => {
            return Err(ProxyError::protocol(format!(
                "SOCKS5 CONNECT failed: invalid address type 0x{other:02x}"
            )))
        }
    };
    let mut addr = vec![0u8; addr_len];
    read_reply(stream, &mut addr, "bound address")?;

    // BND.PORT
    let mut port = [0u8; 2];
    read_reply(stream, &mut port, "bound port")?;

    tracing::debug!(rep, "SOCKS5 connect response: success");
    Ok(())
}

/// RFC 1928 REP 字段的可读描述
pub fn reply_message(rep: u8) -> String {
    match rep {
        0x01 => "general SOCKS server failure".to_string(),
        0x02 => "connection not allowed by ruleset".to_string(),
        0x03 => "network unreachable".to_string(),
        0x04 => "host unreachable".to_string(),
        0x05 => "connection refused".to_string(),
        0x06 => "TTL expired".to_string(),
        0x07 => "command not supported".to_string(),
        0x08 => "address type not supported".to_string(),
        other => format!("unknown error({other})"),
    }
}

fn write_request<S: Write>(stream: &mut S, bytes: &[u8], what: &str) -> Result<(), ProxyError> {
    stream
        .write_all(bytes)
        .and_then(|_| stream.flush())
        .map_err(|e| ProxyError::io(format!("Failed to send SOCKS5 {what}: {e}"), e))
}

/// 短读（对端提前关闭）映射为协议错误，其余 I/O 错误保持为 Io
fn read_reply<S: Read>(stream: &mut S, buf: &mut [u8], what: &str) -> Result<(), ProxyError> {
    stream.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ProxyError::protocol(format!("{MSG_INCOMPLETE_RESPONSE} ({what})"))
        } else {
            ProxyError::io(format!("Failed to read SOCKS5 {what}: {e}"), e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// 内存双工流：读取预置响应，记录写出的字节
    struct ScriptedStream {
        input: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl ScriptedStream {
        fn new(replies: &[u8]) -> Self {
            Self {
                input: Cursor::new(replies.to_vec()),
                written: Vec::new(),
            }
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    const OK_V4_REPLY: [u8; 10] = [0x05, 0x00, 0x00, 0x01, 10, 0, 0, 1, 0x1F, 0x90];

    fn auth() -> Socks5Auth {
        Socks5Auth::new("alice", "secret").unwrap()
    }

    #[test]
    fn test_protocol_constants() {
        assert_eq!(SOCKS5_VERSION, 0x05);
        assert_eq!(AUTH_NO_AUTH, 0x00);
        assert_eq!(AUTH_USERNAME_PASSWORD, 0x02);
        assert_eq!(AUTH_NO_ACCEPTABLE, 0xFF);
        assert_eq!(AUTH_SUBNEG_VERSION, 0x01);
        assert_eq!(CMD_CONNECT, 0x01);
        assert_eq!(ATYP_IPV4, 0x01);
        assert_eq!(ATYP_DOMAIN, 0x03);
        assert_eq!(ATYP_IPV6, 0x04);
    }

    #[test]
    fn test_no_auth_goes_straight_to_connect() {
        let mut replies = vec![0x05, 0x00];
        replies.extend_from_slice(&OK_V4_REPLY);
        let mut s = ScriptedStream::new(&replies);

        connect(&mut s, None, &TunnelTarget::new("93.184.216.34", 80)).unwrap();

        assert_eq!(&s.written[..3], &[0x05, 0x01, 0x00]);
        // 协商之后紧接 CONNECT，没有 0x01 子协商
        assert_eq!(
            &s.written[3..],
            &[0x05, 0x01, 0x00, 0x01, 93, 184, 216, 34, 0x00, 0x50]
        );
    }

    #[test]
    fn test_full_auth_handshake() {
        let mut replies = vec![0x05, 0x02, 0x01, 0x00];
        replies.extend_from_slice(&OK_V4_REPLY);
        let mut s = ScriptedStream::new(&replies);

        connect(&mut s, Some(&auth()), &TunnelTarget::new("example.com", 443)).unwrap();

        let mut expected = vec![0x05, 0x01, 0x02];
        expected.extend_from_slice(&[0x01, 5]);
        expected.extend_from_slice(b"alice");
        expected.push(6);
        expected.extend_from_slice(b"secret");
        expected.extend_from_slice(&[0x05, 0x01, 0x00, 0x03, 11]);
        expected.extend_from_slice(b"example.com");
        expected.extend_from_slice(&[0x01, 0xBB]);
        assert_eq!(s.written, expected);
    }

    #[test]
    fn test_negotiate_method_errors() {
        let cases: [(&[u8], Option<Socks5Auth>, &str); 5] = [
            (&[0x04, 0x00], None, "invalid version"),
            (&[0x05, 0x00], Some(auth()), MSG_AUTH_NOT_HONORED),
            (&[0x05, 0x02], None, MSG_AUTH_REQUIRED),
            (&[0x05, 0xFF], None, MSG_NO_ACCEPTABLE_METHOD),
            (&[0x05, 0x01], None, MSG_UNSUPPORTED_METHOD),
        ];
        for (reply, auth, needle) in cases {
            let mut s = ScriptedStream::new(reply);
            let err = negotiate_method(&mut s, auth.as_ref()).unwrap_err();
            assert!(matches!(err, ProxyError::Protocol(_)), "{err}");
            assert!(err.to_string().contains(needle), "{err}");
        }
    }

    #[test]
    fn test_auth_rejected_is_auth_error() {
        let mut s = ScriptedStream::new(&[0x05, 0x02, 0x01, 0x01]);
        let err = connect(&mut s, Some(&auth()), &TunnelTarget::new("h", 1)).unwrap_err();
        assert!(matches!(err, ProxyError::Auth(_)));
        assert_eq!(err.to_string(), MSG_AUTH_FAILED);
    }

    #[test]
    fn test_auth_reply_version_not_checked() {
        let mut s = ScriptedStream::new(&[0x05, 0x00]);
        auth_user_pass(&mut s, &auth()).unwrap();
    }

    #[test]
    fn test_connect_reply_codes() {
        for (rep, text) in [
            (0x01, "general SOCKS server failure"),
            (0x02, "connection not allowed by ruleset"),
            (0x03, "network unreachable"),
            (0x04, "host unreachable"),
            (0x05, "connection refused"),
            (0x06, "TTL expired"),
            (0x07, "command not supported"),
            (0x08, "address type not supported"),
            (0x42, "unknown error(66)"),
        ] {
            let mut s = ScriptedStream::new(&[0x05, rep, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
            let err = send_connect(&mut s, &TunnelTarget::new("h", 80)).unwrap_err();
            assert!(matches!(err, ProxyError::Protocol(_)));
            assert!(err.to_string().contains(text), "{err}");
        }
    }

    #[test]
    fn test_connect_reply_bound_address_variants() {
        let mut v6 = vec![0x05, 0x00, 0x00, 0x04];
        v6.extend_from_slice(&[0u8; 16]);
        v6.extend_from_slice(&[0, 80]);
        let mut domain = vec![0x05, 0x00, 0x00, 0x03, 4];
        domain.extend_from_slice(b"host");
        domain.extend_from_slice(&[0, 80]);

        for reply in [v6, domain] {
            let mut s = ScriptedStream::new(&reply);
            send_connect(&mut s, &TunnelTarget::new("h", 80)).unwrap();
            // 响应被完整消费
            assert_eq!(s.input.position() as usize, reply.len());
        }
    }

    #[test]
    fn test_short_read_is_protocol_error() {
        let mut s = ScriptedStream::new(&[0x05, 0x00, 0x00, 0x01, 1, 2]);
        let err = send_connect(&mut s, &TunnelTarget::new("h", 80)).unwrap_err();
        assert!(matches!(err, ProxyError::Protocol(_)));
        assert!(err.to_string().contains(MSG_INCOMPLETE_RESPONSE));
        assert!(!err.to_string().contains("CONNECT failed"));

        let mut s = ScriptedStream::new(&[0x05]);
        let err = negotiate_method(&mut s, None).unwrap_err();
        assert!(err.to_string().contains(MSG_INCOMPLETE_RESPONSE));
    }

    #[test]
    fn test_unknown_bound_atyp_rejected() {
        let mut s = ScriptedStream::new(&[0x05, 0x00, 0x00, 0x09, 0, 0]);
        let err = send_connect(&mut s, &TunnelTarget::new("h", 80)).unwrap_err();
        assert!(err.to_string().contains("invalid address type"));
    }

    #[test]
    fn test_target_address_encoding() {
        let v6 = build_connect_request(&TunnelTarget::new("[2001:db8::1]", 443)).unwrap();
        assert_eq!(v6[3], ATYP_IPV6);
        assert_eq!(v6.len(), 4 + 16 + 2);

        let v6_bare = build_connect_request(&TunnelTarget::new("::1", 443)).unwrap();
        assert_eq!(v6_bare[3], ATYP_IPV6);

        let v4 = build_connect_request(&TunnelTarget::new("127.0.0.1", 1080)).unwrap();
        assert_eq!(v4, vec![0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0x04, 0x38]);

        let domain = build_connect_request(&TunnelTarget::new("localhost", 65535)).unwrap();
        assert_eq!(domain[3], ATYP_DOMAIN);
        assert_eq!(domain[4] as usize, "localhost".len());
        assert_eq!(&domain[domain.len() - 2..], &[0xFF, 0xFF]);
    }

    #[test]
    fn test_invalid_targets_fail_before_write() {
        let long = "a".repeat(256);
        for target in [TunnelTarget::new(long, 80), TunnelTarget::new("h", 0), TunnelTarget::new("", 80)] {
            let mut s = ScriptedStream::new(&[]);
            let err = send_connect(&mut s, &target).unwrap_err();
            assert!(matches!(err, ProxyError::Protocol(_)));
            assert!(s.written.is_empty());
        }
        assert!(build_connect_request(&TunnelTarget::new("a".repeat(255), 80)).is_ok());
    }

    #[test]
    fn test_target_display() {
        assert_eq!(TunnelTarget::new("::1", 80).to_string(), "[::1]:80");
        assert_eq!(TunnelTarget::new("example.com", 443).to_string(), "example.com:443");
        let from_addr: TunnelTarget = "10.1.2.3:8080".parse::<SocketAddr>().unwrap().into();
        assert_eq!(from_addr, TunnelTarget::new("10.1.2.3", 8080));
    }
}
