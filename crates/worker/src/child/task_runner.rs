use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use hashfleet_core::models::{
    ChangeTaskStatusRequest, CrackedPasswordRequest, DeviceId, DeviceMap, FileKind, TaskPayload,
    TaskStatus, TaskStatusRequest,
};
use futures::FutureExt;
use hashfleet_core::{HashfleetError, HashfleetResult};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{error, info, warn};

use super::FileCache;
use crate::checkpoint::{rewrite_device_args, RestoreData};
use crate::components::ServerApi;
use crate::engines::{Engine, EngineContext, EngineOutcome, EngineRegistry};

/// 任务执行器的本地设置
#[derive(Debug, Clone)]
pub struct TaskRunnerSettings {
    pub hostname: String,
    pub status_interval: Duration,
    pub task_file_dir: PathBuf,
    pub engine_file_dir: PathBuf,
    pub device_map: DeviceMap,
}

/// 在子进程中端到端地执行一个任务
pub struct TaskRunner {
    api: Arc<dyn ServerApi>,
    registry: Arc<EngineRegistry>,
    files: FileCache,
    settings: TaskRunnerSettings,
}

struct RunResult {
    status: TaskStatus,
    error: Option<String>,
}

impl RunResult {
    fn failed(message: String) -> Self {
        Self {
            status: TaskStatus::Error,
            error: Some(message),
        }
    }
}

impl TaskRunner {
    pub fn new(
        api: Arc<dyn ServerApi>,
        registry: Arc<EngineRegistry>,
        settings: TaskRunnerSettings,
    ) -> Self {
        Self {
            files: FileCache::new(Arc::clone(&api)),
            api,
            registry,
            settings,
        }
    }

    /// 执行任务并上报最终状态，返回上报的状态
    ///
    /// 执行期间的任何错误（包括引擎 panic）都会转换为 `Error` 状态上报，而不是让进程崩溃。
    pub async fn run(
        &self,
        task_id: &str,
        devices: Vec<DeviceId>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> HashfleetResult<TaskStatus> {
        let payload = match self.api.get_task(task_id).await {
            Ok(payload) => payload,
            Err(e) => {
                error!("获取任务 {} 失败: {}", task_id, e);
                self.report(task_id, TaskStatus::Error, Some(format!("获取任务失败: {e}")))
                    .await?;
                return Ok(TaskStatus::Error);
            }
        };

        if let Err(e) = self.report(task_id, TaskStatus::Running, None).await {
            if !is_rejected_transition(&e) {
                return Err(e);
            }
            // 子进程启动前任务已被要求停止，直接结束
            warn!("任务 {} 无法进入运行状态: {}", task_id, e);
            self.report(task_id, TaskStatus::Stopped, None).await?;
            return Ok(TaskStatus::Stopped);
        }
        info!("任务 {} ({}) 开始执行", task_id, payload.task_name);

        let executed = AssertUnwindSafe(self.execute(&payload, devices, shutdown_rx))
            .catch_unwind()
            .await;
        let result = match executed {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!("任务 {} 执行失败: {}", task_id, e);
                RunResult::failed(e.to_string())
            }
            Err(_) => {
                error!("任务 {} 执行时发生panic", task_id);
                RunResult::failed(self.panic_message())
            }
        };

        info!("任务 {} 结束，状态 {}", task_id, result.status);
        self.report(task_id, result.status, result.error).await?;
        Ok(result.status)
    }

    fn panic_message(&self) -> String {
        format!("引擎发生panic，请检查主机 {} 的日志", self.settings.hostname)
    }

    async fn report(
        &self,
        task_id: &str,
        status: TaskStatus,
        error: Option<String>,
    ) -> HashfleetResult<()> {
        self.api
            .change_task_status(&ChangeTaskStatusRequest {
                task_id: task_id.to_string(),
                new_status: status,
                error,
            })
            .await
    }

    async fn execute(
        &self,
        payload: &TaskPayload,
        devices: Vec<DeviceId>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> HashfleetResult<RunResult> {
        let task_id = payload.task_id.as_str();

        let task_file = self
            .files
            .fetch(&payload.file_id, FileKind::Task, &self.settings.task_file_dir)
            .await?;
        let mut engine_files = Vec::with_capacity(payload.engine_file_ids.len());
        for file_id in &payload.engine_file_ids {
            engine_files.push(
                self.files
                    .fetch(file_id, FileKind::Engine, &self.settings.engine_file_dir)
                    .await?,
            );
        }

        let checkpoint = self.load_checkpoint(task_id, &devices).await?;

        let (cracked_tx, mut cracked_rx) = mpsc::unbounded_channel();
        let engine = self.registry.create(
            &payload.engine,
            EngineContext {
                task: payload.clone(),
                devices,
                device_map: self.settings.device_map.clone(),
                task_file,
                engine_files,
                checkpoint,
                cracked_tx,
            },
        )?;

        if let Err(e) = engine.initialize().await {
            self.cleanup(&engine, task_id).await;
            return Err(e);
        }

        if engine.status().await.all_cracked() {
            info!("任务 {} 的所有哈希均已破解，无需执行", task_id);
            self.send_status(payload, &engine, true).await;
            self.cleanup(&engine, task_id).await;
            return Ok(RunResult {
                status: TaskStatus::Finished,
                error: None,
            });
        }

        let mut runner = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.start().await })
        };

        let mut status_ticker = interval(self.settings.status_interval);
        status_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let duration_timer = sleep(Duration::from_secs(payload.task_duration));
        tokio::pin!(duration_timer);
        let mut timer_armed = payload.task_duration > 0;
        let mut stop_sent = false;

        let joined = loop {
            tokio::select! {
                joined = &mut runner => break joined,
                Some(cracked) = cracked_rx.recv() => {
                    self.forward_cracked(cracked).await;
                }
                _ = status_ticker.tick() => {
                    self.send_status(payload, &engine, false).await;
                }
                _ = &mut duration_timer, if timer_armed => {
                    timer_armed = false;
                    info!("任务 {} 达到最长运行时间 {} 秒，停止引擎", task_id, payload.task_duration);
                    if let Err(e) = engine.stop().await {
                        warn!("停止任务 {} 的引擎失败: {}", task_id, e);
                    }
                }
                _ = shutdown_rx.recv(), if !stop_sent => {
                    stop_sent = true;
                    info!("收到停止信号，停止任务 {} 的引擎", task_id);
                    if let Err(e) = engine.stop().await {
                        warn!("停止任务 {} 的引擎失败: {}", task_id, e);
                    }
                }
            }
        };

        let outcome = match joined {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => EngineOutcome::Failed(e.to_string()),
            Err(e) if e.is_panic() => {
                error!("任务 {} 的引擎发生panic", task_id);
                EngineOutcome::Failed(self.panic_message())
            }
            Err(e) => EngineOutcome::Failed(format!("引擎任务被取消: {e}")),
        };

        while let Ok(cracked) = cracked_rx.try_recv() {
            self.forward_cracked(cracked).await;
        }

        self.save_checkpoint(task_id, &engine).await;
        self.send_status(payload, &engine, true).await;
        self.cleanup(&engine, task_id).await;

        Ok(RunResult {
            status: outcome.final_status(),
            error: outcome.error_message(),
        })
    }

    /// 下载检查点并按当前设备改写，没有检查点时返回 `None`
    async fn load_checkpoint(
        &self,
        task_id: &str,
        devices: &[DeviceId],
    ) -> HashfleetResult<Option<Vec<u8>>> {
        let Some(bytes) = self.api.get_checkpoint(task_id).await? else {
            return Ok(None);
        };

        let mut restore = RestoreData::decode(&bytes)?;
        if rewrite_device_args(&mut restore, devices, &self.settings.device_map)? {
            info!("任务 {} 在新的设备上恢复，已改写检查点设备参数", task_id);
            return Ok(Some(restore.encode()?));
        }
        Ok(Some(bytes))
    }

    async fn save_checkpoint(&self, task_id: &str, engine: &Arc<dyn Engine>) {
        let Some(path) = engine.checkpoint_file() else {
            return;
        };

        let uploaded = match tokio::fs::read(&path).await {
            Ok(bytes) => self.api.save_checkpoint(task_id, bytes).await,
            Err(e) => Err(HashfleetError::from(e)),
        };
        match uploaded {
            Ok(()) => {
                info!("任务 {} 的检查点已上传", task_id);
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!("删除本地检查点 {} 失败: {}", path.display(), e);
                }
            }
            Err(e) => error!("上传任务 {} 的检查点失败: {}", task_id, e),
        }
    }

    async fn send_status(&self, payload: &TaskPayload, engine: &Arc<dyn Engine>, final_status: bool) {
        let status = engine.status().await;
        let request = TaskStatusRequest {
            task_id: payload.task_id.clone(),
            engine: payload.engine.clone(),
            payload: status.payload,
            final_status,
        };
        if let Err(e) = self.api.send_task_status(&request).await {
            warn!("上报任务 {} 的引擎状态失败: {}", payload.task_id, e);
        }
    }

    async fn forward_cracked(&self, cracked: CrackedPasswordRequest) {
        if let Err(e) = self.api.saved_cracked_password(&cracked).await {
            error!(
                "上报任务 {} 的破解结果 {} 失败: {}",
                cracked.task_id, cracked.hash, e
            );
        }
    }

    async fn cleanup(&self, engine: &Arc<dyn Engine>, task_id: &str) {
        if let Err(e) = engine.cleanup().await {
            warn!("清理任务 {} 的引擎失败: {}", task_id, e);
        }
    }
}

/// 服务端拒绝了状态转换，例如任务在启动前已进入 Stopping
fn is_rejected_transition(e: &HashfleetError) -> bool {
    matches!(
        e,
        HashfleetError::InvalidStatusTransition { .. } | HashfleetError::Rpc { status_code: 400, .. }
    )
}
