use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hashfleet_core::models::{
    BeaconRequest, ChangeTaskStatusRequest, PayloadItem, StatusCommand, TaskAssignment,
    TaskStatus,
};
use hashfleet_core::{HashfleetResult, VERSION};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::{ProcessSupervisor, ServerApi};

/// 信标循环
///
/// 固定周期向服务端报告本机状态，并按顺序执行响应中的指令。
/// 同一时刻最多只有一个信标在途，失败只记录日志，下个周期重试。
pub struct BeaconManager {
    hostname: String,
    api: Arc<dyn ServerApi>,
    supervisor: Arc<ProcessSupervisor>,
    beacon_interval: Duration,
    engines: HashMap<String, String>,
}

impl BeaconManager {
    pub fn new(
        hostname: String,
        api: Arc<dyn ServerApi>,
        supervisor: Arc<ProcessSupervisor>,
        beacon_interval: Duration,
        engines: HashMap<String, String>,
    ) -> Self {
        Self {
            hostname,
            api,
            supervisor,
            beacon_interval,
            engines,
        }
    }

    pub fn start(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let mut ticker = interval(self.beacon_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            info!("信标循环启动，周期 {:?}", self.beacon_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.beacon_once().await {
                            error!("发送信标失败: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("信标循环停止");
                        break;
                    }
                }
            }
        })
    }

    pub async fn build_beacon(&self) -> BeaconRequest {
        let allocator = self.supervisor.allocator();
        BeaconRequest {
            worker_version: VERSION.to_string(),
            hostname: self.hostname.clone(),
            request_new_task: allocator.can_accept_unpinned().await,
            devices: allocator.snapshot().await,
            processes: self.supervisor.process_snapshot().await,
            engines: self.engines.clone(),
        }
    }

    /// 发送一次信标并处理响应，返回执行的指令数
    pub async fn beacon_once(&self) -> HashfleetResult<usize> {
        let request = self.build_beacon().await;
        let response = self.api.beacon(&request).await?;
        debug!(
            "信标响应: server_time={}, items={}",
            response.server_time,
            response.payload.len()
        );

        let mut handled = 0;
        for item in response.payload {
            match item {
                PayloadItem::NewTask(assignment) => {
                    self.start_task(assignment).await;
                    handled += 1;
                }
                PayloadItem::ChangeTaskStatus(command) => {
                    self.apply_status_command(command).await;
                    handled += 1;
                }
                PayloadItem::Unknown => debug!("忽略未知的信标指令"),
            }
        }
        Ok(handled)
    }

    async fn start_task(&self, assignment: TaskAssignment) {
        info!(
            "收到新任务 {} ({:?})",
            assignment.task_id, assignment.priority
        );
        if let Err(e) = self.supervisor.create_task(&assignment).await {
            error!("启动任务 {} 失败: {}", assignment.task_id, e);
            let report = ChangeTaskStatusRequest {
                task_id: assignment.task_id.clone(),
                new_status: TaskStatus::Error,
                error: Some(format!("{} 无法启动任务: {}", self.hostname, e)),
            };
            if let Err(e) = self.api.change_task_status(&report).await {
                error!("上报任务 {} 的错误状态失败: {}", assignment.task_id, e);
            }
        }
    }

    async fn apply_status_command(&self, command: StatusCommand) {
        match command.new_status {
            TaskStatus::Stopping => {
                if let Err(e) = self.supervisor.stop_task(&command.task_id).await {
                    error!("停止任务 {} 失败: {}", command.task_id, e);
                }
            }
            other => warn!(
                "不支持的状态指令: task={}, status={}",
                command.task_id, other
            ),
        }
    }
}
