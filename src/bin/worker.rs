use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hashfleet::common::{pick, spawn_signal_listener};
use hashfleet::ShutdownManager;
use hashfleet_core::config::{load_config, WorkerConfig};
use hashfleet_core::models::{parse_device_ids, DeviceId};
use hashfleet_core::{init_logging, task_span, VERSION};
use hashfleet_worker::{run_child, ChildCommand, EngineRegistry, RpcClient, WorkerLifecycle};
use tracing::{error, info, Instrument};

#[derive(Parser, Debug)]
#[command(name = "hashfleet-worker", version, about = "分布式密码破解编排系统 - Worker")]
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

    /// 以子进程模式执行单个任务，由父进程启动
    #[arg(long, requires = "task_id", requires = "devices")]
    child: bool,

    #[arg(long, value_name = "ID", requires = "child")]
    task_id: Option<String>,

    /// 逗号分隔的设备编号，例如 `1,2`
    #[arg(long, value_name = "IDS", requires = "child")]
    devices: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config: WorkerConfig =
        load_config(cli.config.as_deref()).context("加载Worker配置失败")?;
    init_logging(
        pick(cli.log_level.as_deref(), &config.log_level),
        pick(cli.log_format.as_deref(), &config.log_format),
    )?;
    config.validate().context("Worker配置校验失败")?;

    match (cli.child, &cli.task_id, &cli.devices) {
        (true, Some(task_id), Some(devices)) => {
            let devices = parse_device_ids(devices)
                .with_context(|| format!("无效的设备列表: {devices}"))?;
            run_child_mode(&config, task_id, devices).await
        }
        _ => run_parent_mode(&cli, &config).await,
    }
}

async fn run_parent_mode(cli: &Cli, config: &WorkerConfig) -> Result<()> {
    info!("启动 hashfleet-worker {} ({})", VERSION, config.resolve_hostname());

    let api = Arc::new(RpcClient::from_config(&config.server).context("创建RPC客户端失败")?);
    let registry = EngineRegistry::with_hashcat(config.hashcat.clone());

    // 子进程沿用父进程的配置与日志参数
    let mut child_command = ChildCommand::current_exe()?;
    if let Some(path) = &cli.config {
        child_command.extra_args.extend(["--config".to_string(), path.clone()]);
    }
    for (flag, value) in [("--log-level", &cli.log_level), ("--log-format", &cli.log_format)] {
        if let Some(value) = value {
            child_command.extra_args.extend([flag.to_string(), value.clone()]);
        }
    }

    let worker = WorkerLifecycle::new(config, api, child_command, &registry);
    worker.start().await?;

    let shutdown = ShutdownManager::new();
    spawn_signal_listener(shutdown.clone());
    shutdown.wait_for_shutdown().await;
    info!("收到关闭信号，停止所有任务...");

    if let Err(e) = worker.stop().await {
        error!("子进程未在宽限期内退出，立即结束Worker: {}", e);
        std::process::exit(1);
    }

    info!("hashfleet-worker 已退出");
    Ok(())
}

async fn run_child_mode(config: &WorkerConfig, task_id: &str, devices: Vec<DeviceId>) -> Result<()> {
    info!("子进程启动: 任务 {}，设备 {:?}", task_id, devices);

    let api = Arc::new(RpcClient::from_config(&config.server).context("创建RPC客户端失败")?);
    let registry = Arc::new(EngineRegistry::with_hashcat(config.hashcat.clone()));

    let shutdown = ShutdownManager::new();
    spawn_signal_listener(shutdown.clone());

    let status = run_child(
        config,
        api,
        registry,
        task_id,
        devices,
        shutdown.subscribe().await,
    )
    .instrument(task_span(task_id))
    .await?;
    info!("任务 {} 结束，最终状态 {}", task_id, status);
    Ok(())
}
