//! Proxy error types for classification and handling

use std::io;
use thiserror::Error;

/// Stable marker prefixed to every configuration error message.
pub const PROXY_CONFIG_ERROR: &str = "PROXY_CONFIG_ERROR";

/// Stable marker prefixed by the classifier to authentication failures.
pub const PROXY_AUTH_FAIL: &str = "PROXY_AUTH_FAIL";

/// Coarse error family, used by callers that only need to branch on the kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyErrorKind {
    Config,
    Protocol,
    Auth,
    Io,
}

/// Proxy-specific error types for better error classification
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Malformed descriptor or invalid credentials, detected before any socket is opened
    #[error("PROXY_CONFIG_ERROR: {0}")]
    Config(String),

    /// Handshake framing, version, method or reply-code failure
    #[error("{0}")]
    Protocol(String),

    /// Username/password sub-negotiation rejected by the proxy
    #[error("{0}")]
    Auth(String),

    /// Transport failure (refused, reset, timed out, DNS)
    #[error("{message}")]
    Io {
        message: String,
        #[source]
        source: io::Error,
    },
}

impl ProxyError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        ProxyError::Config(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        ProxyError::Protocol(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        ProxyError::Auth(msg.into())
    }

    /// Create an I/O error carrying the underlying cause
    pub fn io(msg: impl Into<String>, source: io::Error) -> Self {
        ProxyError::Io {
            message: msg.into(),
            source,
        }
    }

    pub fn kind(&self) -> ProxyErrorKind {
        match self {
            ProxyError::Config(_) => ProxyErrorKind::Config,
            ProxyError::Protocol(_) => ProxyErrorKind::Protocol,
            ProxyError::Auth(_) => ProxyErrorKind::Auth,
            ProxyError::Io { .. } => ProxyErrorKind::Io,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self.kind() {
            ProxyErrorKind::Config => "config",
            ProxyErrorKind::Protocol => "protocol",
            ProxyErrorKind::Auth => "auth",
            ProxyErrorKind::Io => "io",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ProxyError::Io { source, .. }
                if matches!(source.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
        )
    }
}

impl From<ProxyError> for io::Error {
    fn from(err: ProxyError) -> Self {
        let kind = match &err {
            ProxyError::Io { source, .. } => source.kind(),
            ProxyError::Config(_) => io::ErrorKind::InvalidInput,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
