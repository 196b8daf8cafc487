use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use hashfleet_core::models::{
    devices_overlap, BeaconRequest, DeviceId, PayloadItem, StatusCommand, Task, TaskAssignment,
    TaskStatus,
};
use hashfleet_core::traits::{PendingTasksRequest, StorageBackend};
use hashfleet_core::HashfleetResult;
use tracing::{debug, error, info};

/// 任务调度器
///
/// 根据主机名、忙碌设备和正在运行的任务，为信标挑选下一个任务并收集待下发的停止命令。
pub struct TaskScheduler {
    storage: Arc<dyn StorageBackend>,
}

impl TaskScheduler {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// 选出下一个可在该主机上运行的任务，并原子地将其标记为 `Dequeued`
    ///
    /// 没有候选任务时返回 `Ok(None)`，这不是错误。
    pub async fn next_task(
        &self,
        hostname: &str,
        devices_in_use: &[DeviceId],
        running_task_ids: &[String],
    ) -> HashfleetResult<Option<TaskAssignment>> {
        let request = PendingTasksRequest {
            hostname: hostname.to_string(),
            devices_in_use: devices_in_use.to_vec(),
        };
        let pending = self.storage.get_pending_tasks(&request).await?;
        let candidates = rank_candidates(pending, hostname, devices_in_use, running_task_ids);

        for task in candidates {
            if self.storage.dequeue_task(&task.id, hostname).await? {
                info!(
                    "分配任务 {} ({:?}) 给主机 {}",
                    task.id, task.priority, hostname
                );
                return Ok(Some(TaskAssignment {
                    task_id: task.id,
                    priority: task.priority,
                    devices: task.assigned_to_devices.filter(|d| !d.is_empty()),
                }));
            }
            debug!("任务 {} 已被其他主机取走，尝试下一个候选", task.id);
        }

        Ok(None)
    }

    /// 在主机正在运行的任务中找出状态为 `Stopping` 的任务
    pub async fn pending_stop_commands(
        &self,
        running_task_ids: &[String],
    ) -> HashfleetResult<Vec<String>> {
        if running_task_ids.is_empty() {
            return Ok(Vec::new());
        }

        let tasks = self.storage.get_tasks(running_task_ids).await?;
        Ok(tasks
            .into_iter()
            .filter(|t| t.status == TaskStatus::Stopping)
            .map(|t| t.id)
            .collect())
    }

    /// 为一次信标构建响应指令
    ///
    /// 存储错误只记录日志，对应部分按“没有新工作”处理，不影响整个信标。
    pub async fn pending_work(&self, beacon: &BeaconRequest) -> Vec<PayloadItem> {
        let running = beacon.running_task_ids();
        let mut items = Vec::new();

        match self.pending_stop_commands(&running).await {
            Ok(stops) => {
                items.extend(stops.into_iter().map(|task_id| {
                    PayloadItem::ChangeTaskStatus(StatusCommand {
                        task_id,
                        new_status: TaskStatus::Stopping,
                    })
                }));
            }
            Err(e) => error!("查询主机 {} 的停止命令失败: {}", beacon.hostname, e),
        }

        if beacon.request_new_task {
            let busy = beacon.devices.busy_devices();
            match self.next_task(&beacon.hostname, &busy, &running).await {
                Ok(Some(assignment)) => items.push(PayloadItem::NewTask(assignment)),
                Ok(None) => debug!("主机 {} 暂无可分配任务", beacon.hostname),
                Err(e) => error!("为主机 {} 调度任务失败: {}", beacon.hostname, e),
            }
        }

        items
    }
}

/// 过滤并排序候选任务
///
/// 候选条件：状态为 `Queued`、主机绑定为空或等于 `hostname`、设备绑定与忙碌设备无交集、
/// 且不在正在运行的任务列表中。按优先级升序、创建时间升序排列。
pub fn rank_candidates(
    tasks: Vec<Task>,
    hostname: &str,
    devices_in_use: &[DeviceId],
    running_task_ids: &[String],
) -> Vec<Task> {
    let running: HashSet<&str> = running_task_ids.iter().map(String::as_str).collect();

    let mut candidates: Vec<Task> = tasks
        .into_iter()
        .filter(|t| t.status == TaskStatus::Queued)
        .filter(|t| t.assigned_to_host.is_empty() || t.assigned_to_host == hostname)
        .filter(|t| !devices_overlap(t.pinned_devices(), devices_in_use))
        .filter(|t| !running.contains(t.id.as_str()))
        .collect();

    candidates.sort_by(compare_candidates);
    candidates
}

fn compare_candidates(a: &Task, b: &Task) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}
