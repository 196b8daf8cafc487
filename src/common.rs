use tokio::signal;
use tracing::{error, info};

use crate::shutdown::ShutdownManager;

/// 等待 Ctrl+C 或 SIGTERM
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.unwrap_or_else(|e| {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::process::exit(1);
        })
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => signal.recv().await,
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::process::exit(1);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

/// 收到系统信号后触发关闭管理器
pub fn spawn_signal_listener(shutdown: ShutdownManager) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        shutdown.shutdown().await;
    });
}

/// 命令行覆盖优先于配置文件
pub fn pick<'a>(cli: Option<&'a str>, configured: &'a str) -> &'a str {
    cli.unwrap_or(configured)
}
