use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// 服务端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    /// 为空时以明文 HTTP 监听，仅用于开发和测试
    pub tls: Option<TlsConfig>,
    pub log_level: String,
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:4014".to_string(),
            tls: None,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// 双向 TLS 所需的证书材料
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub certificate: PathBuf,
    pub private_key: PathBuf,
    /// 用于校验客户端证书的 CA
    pub ca_certificate: PathBuf,
}

impl ServerConfig {
    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listen
            .parse()
            .map_err(|e| anyhow::anyhow!("无效的监听地址 {}: {}", self.listen, e))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.listen_addr()?;

        if let Some(tls) = &self.tls {
            for path in [&tls.certificate, &tls.private_key, &tls.ca_certificate] {
                if !path.exists() {
                    return Err(anyhow::anyhow!("证书文件不存在: {}", path.display()));
                }
            }
        }

        Ok(())
    }
}
