use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::get;
use axum_server::Handle;
use clap::Parser;
use hashfleet::common::{pick, spawn_signal_listener};
use hashfleet::ShutdownManager;
use hashfleet_api::server::{serve, GRACEFUL_SHUTDOWN_TIMEOUT};
use hashfleet_api::{create_app, AppState};
use hashfleet_core::config::{load_config, ServerConfig};
use hashfleet_core::{init_logging, VERSION};
use hashfleet_infrastructure::InMemoryStorage;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "hashfleet-server", version, about = "分布式密码破解编排系统 - RPC服务端")]
struct Cli {
    /// 配置文件路径（TOML）
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// 日志格式 (json, pretty)
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config: ServerConfig =
        load_config(cli.config.as_deref()).context("加载服务端配置失败")?;
    init_logging(
        pick(cli.log_level.as_deref(), &config.log_level),
        pick(cli.log_format.as_deref(), &config.log_format),
    )?;
    config.validate().context("服务端配置校验失败")?;

    info!("启动 hashfleet-server {}", VERSION);

    // 指标句柄在创建时绑定记录器，必须先安装
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("安装Prometheus指标记录器失败")?;

    let state = AppState::new(Arc::new(InMemoryStorage::new()));
    let app = create_app(state).route(
        "/metrics",
        get(move || {
            let prometheus = prometheus.clone();
            async move { prometheus.render() }
        }),
    );

    let shutdown = ShutdownManager::new();
    spawn_signal_listener(shutdown.clone());

    let handle = Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        shutdown.wait_for_shutdown().await;
        info!("收到关闭信号，开始优雅关闭...");
        shutdown_handle.graceful_shutdown(Some(GRACEFUL_SHUTDOWN_TIMEOUT));
    });

    serve(&config, app, handle).await?;
    info!("hashfleet-server 已退出");
    Ok(())
}
