//! 子进程模式：每个子进程只执行一个任务

pub mod file_cache;
pub mod task_runner;

use std::sync::Arc;

use hashfleet_core::config::WorkerConfig;
use hashfleet_core::models::{DeviceId, TaskStatus};
use hashfleet_core::HashfleetResult;
use tokio::sync::broadcast;

pub use file_cache::{FileCache, FileLock};
pub use task_runner::{TaskRunner, TaskRunnerSettings};

use crate::components::ServerApi;
use crate::engines::EngineRegistry;

impl TaskRunnerSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            hostname: config.resolve_hostname(),
            status_interval: config.intervals.job_status(),
            task_file_dir: config.save_task_file_path.clone(),
            engine_file_dir: config.save_engine_file_path.clone(),
            device_map: config.device_map(),
        }
    }
}

/// 子进程入口
pub async fn run_child(
    config: &WorkerConfig,
    api: Arc<dyn ServerApi>,
    registry: Arc<EngineRegistry>,
    task_id: &str,
    devices: Vec<DeviceId>,
    shutdown_rx: broadcast::Receiver<()>,
) -> HashfleetResult<TaskStatus> {
    let runner = TaskRunner::new(api, registry, TaskRunnerSettings::from_config(config));
    runner.run(task_id, devices, shutdown_rx).await
}
