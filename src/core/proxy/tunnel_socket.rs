//! SOCKS5 tunnel socket
//!
//! `TunnelSocket` owns a plain TCP connection to the proxy and intercepts only
//! `connect`: the raw connection is opened to the proxy address, the SOCKS5
//! handshake runs on it, and only then is the socket exposed as connected.
//! Every other operation forwards to the raw connection unchanged.

use super::config::Socks5Auth;
use super::errors::ProxyError;
use super::socks5_protocol::{self, TunnelTarget};
use super::connect_tcp;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

/// Handshake deadline used when the caller passes a non-positive timeout
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 15_000;

#[derive(Debug, Default, Clone, Copy)]
struct PendingTimeouts {
    read: Option<Duration>,
    write: Option<Duration>,
}

/// Connection that tunnels through a SOCKS5 proxy
pub struct TunnelSocket {
    proxy_host: String,
    proxy_port: u16,
    auth: Option<Socks5Auth>,
    raw: OnceLock<TcpStream>,
    // 连接前设置的超时，连接建立后写入 raw
    pending: Mutex<PendingTimeouts>,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl TunnelSocket {
    pub fn new(proxy_host: impl Into<String>, proxy_port: u16, auth: Option<Socks5Auth>) -> Self {
        Self {
            proxy_host: proxy_host.into(),
            proxy_port,
            auth,
            raw: OnceLock::new(),
            pending: Mutex::new(PendingTimeouts::default()),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn proxy_host(&self) -> &str {
        &self.proxy_host
    }

    pub fn proxy_port(&self) -> u16 {
        self.proxy_port
    }

    /// Connect to the proxy and establish a tunnel to `target`.
    ///
    /// `timeout_ms == 0` selects [`DEFAULT_HANDSHAKE_TIMEOUT_MS`]. The deadline
    /// bounds the TCP connect and is installed as read/write timeout for the
    /// handshake only; the previously configured timeouts are restored
    /// afterwards. On failure the raw connection is shut down and the socket
    /// is left closed.
    pub fn connect(&self, target: &TunnelTarget, timeout_ms: u64) -> Result<(), ProxyError> {
        if self.is_closed() {
            return Err(ProxyError::io("Socket is closed", not_connected("socket is closed")));
        }
        if self.connected.load(Ordering::SeqCst) || self.raw.get().is_some() {
            return Err(ProxyError::io(
                "Socket is already connected",
                io::Error::new(io::ErrorKind::AlreadyExists, "socket is already connected"),
            ));
        }

        let handshake_timeout = Duration::from_millis(if timeout_ms > 0 {
            timeout_ms
        } else {
            DEFAULT_HANDSHAKE_TIMEOUT_MS
        });
        let start = Instant::now();

        tracing::debug!(
            proxy.type = "socks5",
            proxy.host = %self.proxy_host,
            proxy.port = self.proxy_port,
            target.host = %target.host,
            target.port = target.port,
            timeout_ms = handshake_timeout.as_millis() as u64,
            "Attempting SOCKS5 tunnel"
        );

        let stream = connect_tcp(&self.proxy_host, self.proxy_port, handshake_timeout)?;
        let pending = *self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let applied = stream
            .set_read_timeout(Some(handshake_timeout))
            .and_then(|_| stream.set_write_timeout(Some(handshake_timeout)));
        if let Err(e) = applied {
            let _ = stream.shutdown(Shutdown::Both);
            self.closed.store(true, Ordering::SeqCst);
            return Err(ProxyError::io(format!("Failed to set handshake timeout: {e}"), e));
        }

        if self.raw.set(stream).is_err() {
            return Err(ProxyError::io(
                "Socket is already connected",
                io::Error::new(io::ErrorKind::AlreadyExists, "concurrent connect attempt"),
            ));
        }
        let Some(raw) = self.raw.get() else {
            return Err(ProxyError::io("Socket is closed", not_connected("socket is closed")));
        };

        // close() 可能在 TCP 连接期间被调用，此时它还看不到 raw
        if self.is_closed() {
            let _ = raw.shutdown(Shutdown::Both);
            return Err(ProxyError::io("Socket is closed", not_connected("closed during connect")));
        }

        let mut handshake_stream = raw;
        let result = socks5_protocol::connect(&mut handshake_stream, self.auth.as_ref(), target)
            .and_then(|()| {
                // 握手成功后恢复调用方设置的超时
                raw.set_read_timeout(pending.read)
                    .and_then(|_| raw.set_write_timeout(pending.write))
                    .map_err(|e| ProxyError::io(format!("Failed to restore socket timeouts: {e}"), e))
            });

        match result {
            Ok(()) => {
                self.connected.store(true, Ordering::SeqCst);
                tracing::info!(
                    proxy.type = "socks5",
                    proxy.host = %self.proxy_host,
                    proxy.port = self.proxy_port,
                    target.host = %target.host,
                    target.port = target.port,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "SOCKS5 tunnel established successfully"
                );
                Ok(())
            }
            Err(e) => {
                self.closed.store(true, Ordering::SeqCst);
                let _ = raw.shutdown(Shutdown::Both);
                tracing::warn!(
                    error = %e,
                    error_category = e.category(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "SOCKS5 handshake failed"
                );
                Err(e)
            }
        }
    }

    fn raw(&self) -> io::Result<&TcpStream> {
        if self.is_closed() {
            return Err(not_connected("socket is closed"));
        }
        self.raw.get().ok_or_else(|| not_connected("socket is not connected"))
    }

    /// Connected and not closed
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.is_closed()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Idempotent; safe to call from another thread while a handshake is blocked.
    pub fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            // 已关闭，但握手线程可能刚刚写入 raw，再补一次 shutdown
            if let Some(raw) = self.raw.get() {
                let _ = raw.shutdown(Shutdown::Both);
            }
            return Ok(());
        }
        match self.raw.get() {
            Some(raw) => match raw.shutdown(Shutdown::Both) {
                Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
                _ => Ok(()),
            },
            None => Ok(()),
        }
    }

    pub fn read_timeout(&self) -> io::Result<Option<Duration>> {
        match self.raw.get() {
            Some(raw) if !self.is_closed() => raw.read_timeout(),
            Some(_) => Err(not_connected("socket is closed")),
            None => Ok(self.pending.lock().unwrap_or_else(PoisonError::into_inner).read),
        }
    }

    pub fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        match self.raw.get() {
            Some(_) => self.raw()?.set_read_timeout(dur),
            None => {
                check_timeout(dur)?;
                self.pending.lock().unwrap_or_else(PoisonError::into_inner).read = dur;
                Ok(())
            }
        }
    }

    pub fn write_timeout(&self) -> io::Result<Option<Duration>> {
        match self.raw.get() {
            Some(raw) if !self.is_closed() => raw.write_timeout(),
            Some(_) => Err(not_connected("socket is closed")),
            None => Ok(self.pending.lock().unwrap_or_else(PoisonError::into_inner).write),
        }
    }

    pub fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        match self.raw.get() {
            Some(_) => self.raw()?.set_write_timeout(dur),
            None => {
                check_timeout(dur)?;
                self.pending.lock().unwrap_or_else(PoisonError::into_inner).write = dur;
                Ok(())
            }
        }
    }

    /// Address of the proxy this socket is connected to
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.raw()?.peer_addr()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.raw()?.local_addr()
    }

    pub fn shutdown_read(&self) -> io::Result<()> {
        self.raw()?.shutdown(Shutdown::Read)
    }

    pub fn shutdown_write(&self) -> io::Result<()> {
        self.raw()?.shutdown(Shutdown::Write)
    }

    pub fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        self.raw()?.set_nodelay(nodelay)
    }
}

impl std::fmt::Debug for TunnelSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelSocket")
            .field("proxy_host", &self.proxy_host)
            .field("proxy_port", &self.proxy_port)
            .field("auth", &self.auth.is_some())
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Read for &TunnelSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut raw = self.raw()?;
        raw.read(buf)
    }
}

impl Write for &TunnelSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut raw = self.raw()?;
        raw.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut raw = self.raw()?;
        raw.flush()
    }
}

impl Read for TunnelSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self).read(buf)
    }
}

impl Write for TunnelSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (&*self).flush()
    }
}

fn not_connected(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, msg.to_string())
}

// 与 TcpStream 的行为一致：Some(0) 非法
fn check_timeout(dur: Option<Duration>) -> io::Result<()> {
    if dur == Some(Duration::ZERO) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "cannot set a 0 duration timeout",
        ));
    }
    Ok(())
}
