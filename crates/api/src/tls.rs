//! 服务端双向 TLS 配置
//!
//! 只接受由配置的 CA 签发的客户端证书，未携带证书的连接在握手阶段被拒绝。

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use hashfleet_core::config::TlsConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file =
        File::open(path).with_context(|| format!("无法打开证书文件: {}", path.display()))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("解析证书失败: {}", path.display()))?;

    if certs.is_empty() {
        return Err(anyhow::anyhow!("证书文件中没有证书: {}", path.display()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file =
        File::open(path).with_context(|| format!("无法打开私钥文件: {}", path.display()))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .with_context(|| format!("解析私钥失败: {}", path.display()))?
        .ok_or_else(|| anyhow::anyhow!("私钥文件中没有私钥: {}", path.display()))
}

/// 构建要求客户端证书的 rustls 服务端配置
pub fn build_server_config(tls: &TlsConfig) -> Result<rustls::ServerConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut roots = RootCertStore::empty();
    for cert in load_certs(&tls.ca_certificate)? {
        roots.add(cert).context("添加CA证书失败")?;
    }
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .build()
        .context("创建客户端证书校验器失败")?;

    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .context("初始化TLS协议版本失败")?
        .with_client_cert_verifier(verifier)
        .with_single_cert(
            load_certs(&tls.certificate)?,
            load_private_key(&tls.private_key)?,
        )
        .context("加载服务端证书失败")?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(config)
}

pub fn rustls_config(tls: &TlsConfig) -> Result<RustlsConfig> {
    Ok(RustlsConfig::from_config(Arc::new(build_server_config(
        tls,
    )?)))
}
