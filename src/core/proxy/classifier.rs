//! Request-boundary error classification
//!
//! Everything leaving the HTTP client goes through [`classify`], so callers
//! see a single `std::io::Error` family. SOCKS5 authentication failures are
//! recognized by message anywhere in the cause chain and tagged with
//! [`PROXY_AUTH_FAIL`].

use super::errors::{ProxyError, ProxyErrorKind, PROXY_AUTH_FAIL, PROXY_CONFIG_ERROR};
use super::socks5_protocol::AUTH_FAILURE_MARKERS;
use std::error::Error as StdError;
use std::io;
use thiserror::Error;

/// Authentication failure surfaced to callers
#[derive(Debug, Error)]
#[error("{PROXY_AUTH_FAIL}: {message}")]
pub struct ProxyAuthFailure {
    message: String,
    #[source]
    source: Box<dyn StdError + Send + Sync + 'static>,
}

/// Convert any request failure into an `io::Error`.
pub fn classify(err: anyhow::Error) -> io::Error {
    if chain_has_auth_marker(&err) {
        tracing::warn!(error = %err, "Proxy authentication failed");
        // 带上完整原因链，外层 context 往往只描述了请求本身
        let failure = ProxyAuthFailure {
            message: format!("{err:#}"),
            source: err.into(),
        };
        return io::Error::new(io::ErrorKind::PermissionDenied, failure);
    }

    let err = match err.downcast::<io::Error>() {
        Ok(io_err) => return io_err,
        Err(other) => other,
    };
    let err = match err.downcast::<ProxyError>() {
        Ok(proxy_err) => return proxy_err.into(),
        Err(other) => other,
    };

    // 根因是 io::Error 时保留其 kind
    let kind = err
        .root_cause()
        .downcast_ref::<io::Error>()
        .map(io::Error::kind)
        .unwrap_or(io::ErrorKind::Other);
    let boxed: Box<dyn StdError + Send + Sync + 'static> = err.into();
    io::Error::new(kind, boxed)
}

fn chain_has_auth_marker(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        let message = cause.to_string().to_ascii_lowercase();
        AUTH_FAILURE_MARKERS
            .iter()
            .any(|marker| message.contains(&marker.to_ascii_lowercase()))
    })
}

/// Whether `err` was tagged by [`classify`] as an authentication failure
pub fn is_auth_failure(err: &io::Error) -> bool {
    err.to_string().starts_with(PROXY_AUTH_FAIL)
}

/// Whether `err` stems from a malformed proxy descriptor
pub fn is_config_error(err: &io::Error) -> bool {
    if let Some(proxy_err) = err.get_ref().and_then(|e| e.downcast_ref::<ProxyError>()) {
        return proxy_err.kind() == ProxyErrorKind::Config;
    }
    err.to_string().contains(PROXY_CONFIG_ERROR)
}
