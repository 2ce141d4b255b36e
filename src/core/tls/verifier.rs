use std::sync::Arc;

use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::ClientConfig;
use rustls::{Certificate, Error as TlsError, OwnedTrustAnchor, RootCertStore, ServerName};

use crate::core::config::model::TlsCfg;

/// 极不安全：完全跳过证书链与域名校验，仅用于调试。
/// 当 `tls.insecure_skip_verify=true` 时启用。
pub struct InsecureCertVerifier;

impl ServerCertVerifier for InsecureCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }
}

fn webpki_root_store() -> RootCertStore {
    let mut root_store = RootCertStore::empty();
    root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(ta.subject, ta.spki, ta.name_constraints)
    }));
    root_store
}

/// 创建 rustls ClientConfig（无客户端证书）；默认按 webpki 根证书校验
pub fn create_client_config(tls: &TlsCfg) -> ClientConfig {
    let mut cfg = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(webpki_root_store())
        .with_no_client_auth();
    if tls.insecure_skip_verify {
        tracing::warn!(target = "tls", "certificate verification disabled (insecureSkipVerify)");
        cfg.dangerous().set_certificate_verifier(Arc::new(InsecureCertVerifier));
    }
    cfg
}

/// 由 URL 主机构造 ServerName；IPv6 字面量去掉方括号
pub fn server_name_for(host: &str) -> Result<ServerName, TlsError> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    ServerName::try_from(bare).map_err(|e| TlsError::General(format!("invalid server name '{host}': {e}")))
}
