use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum_server::Handle;
use hashfleet_core::config::ServerConfig;
use tracing::{info, warn};

use crate::tls;

/// 优雅关闭时等待在途请求的最长时间
pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// 启动 RPC 服务，直到 `handle` 触发关闭
///
/// 配置了 TLS 时使用双向 TLS，否则以明文 HTTP 监听。
pub async fn serve(config: &ServerConfig, app: Router, handle: Handle) -> Result<()> {
    let addr = config.listen_addr()?;

    match &config.tls {
        Some(tls_config) => {
            let rustls = tls::rustls_config(tls_config)?;
            info!("RPC服务以双向TLS监听 {}", addr);
            axum_server::bind_rustls(addr, rustls)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .context("RPC服务运行失败")?;
        }
        None => {
            warn!("未配置TLS，RPC服务以明文HTTP监听 {}，仅用于开发与测试", addr);
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .context("RPC服务运行失败")?;
        }
    }

    info!("RPC服务已停止");
    Ok(())
}
