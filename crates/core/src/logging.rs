use std::str::FromStr;

use anyhow::{Context, Result};
use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// HTTP 与 TLS 栈在 debug 级别下过于嘈杂，默认压到 warn
const QUIET_DEPENDENCIES: &[&str] = &["hyper", "hyper_util", "h2", "rustls", "reqwest"];

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(anyhow::anyhow!("不支持的日志格式: {other}")),
        }
    }
}

/// 未设置 `RUST_LOG` 时使用的过滤指令
pub fn default_directives(log_level: &str) -> String {
    QUIET_DEPENDENCIES
        .iter()
        .fold(log_level.to_string(), |acc, target| format!("{acc},{target}=warn"))
}

/// 初始化日志系统
///
/// `RUST_LOG` 存在时优先于传入的日志级别。
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let format: LogFormat = log_format.parse()?;
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives(log_level))
            .with_context(|| format!("无效的日志级别: {log_level}"))?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .flatten_event(true),
            )
            .try_init()
            .context("初始化JSON日志失败")?,
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("初始化Pretty日志失败")?,
    }

    Ok(())
}

/// 子进程中执行单个任务的 span，日志都带上 `task_id`
pub fn task_span(task_id: &str) -> Span {
    tracing::info_span!("task", task_id = %task_id)
}
