use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{HashfleetError, HashfleetResult};
use crate::models::DeviceId;

/// 任务ID
pub type TaskId = String;

/// 破解任务定义
///
/// 任务由存储层持有；调度器只读取并更新其状态与分配字段。
///
/// # 字段说明
///
/// - `assigned_to_host`: 主机绑定，空字符串表示任意主机
/// - `assigned_to_devices`: 设备绑定，`None` 或空列表表示任意设备
/// - `dequeued_by`: 最近一次领取该任务的主机，不影响主机绑定
/// - `engine` / `engine_payload`: 引擎名称及其专有配置
/// - `file_id` / `engine_file_ids`: 主输入文件以及引擎引用的辅助文件（字典、规则等）
/// - `task_duration`: 最长运行秒数，0 表示不限
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub priority: Priority,
    #[serde(default)]
    pub assigned_to_host: String,
    #[serde(default)]
    pub assigned_to_devices: Option<Vec<DeviceId>>,
    #[serde(default)]
    pub dequeued_by: Option<String>,
    pub engine: String,
    pub engine_payload: serde_json::Value,
    pub file_id: String,
    #[serde(default)]
    pub engine_file_ids: Vec<String>,
    #[serde(default)]
    pub task_duration: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl Task {
    /// 创建一个处于排队状态的新任务
    pub fn new(id: impl Into<TaskId>, name: impl Into<String>, priority: Priority) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            status: TaskStatus::Queued,
            priority,
            assigned_to_host: String::new(),
            assigned_to_devices: None,
            dequeued_by: None,
            engine: "hashcat".to_string(),
            engine_payload: serde_json::Value::Null,
            file_id: String::new(),
            engine_file_ids: Vec::new(),
            task_duration: 0,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// 设备绑定列表，未绑定时为空切片
    pub fn pinned_devices(&self) -> &[DeviceId] {
        self.assigned_to_devices.as_deref().unwrap_or(&[])
    }
}

/// 任务状态
///
/// `Queued → Dequeued → Running → {Stopping → Stopped, Exhausted, Finished, Error}`，
/// 其中 `Stopped` 与 `Error` 可以被重新排队。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Queued,
    Dequeued,
    Running,
    Stopping,
    Stopped,
    Exhausted,
    Finished,
    Error,
}

impl TaskStatus {
    /// 判断状态机是否允许 `self -> next`
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, next),
            (Queued, Dequeued)
                | (Dequeued, Running)
                | (Dequeued, Stopping)
                | (Dequeued, Error)
                | (Running, Stopping)
                | (Running, Stopped)
                | (Running, Exhausted)
                | (Running, Finished)
                | (Running, Error)
                | (Stopping, Stopped)
                | (Stopping, Exhausted)
                | (Stopping, Finished)
                | (Stopping, Error)
                | (Stopped, Queued)
                | (Error, Queued)
        )
    }

    /// 校验状态转换，不合法时返回验证错误
    pub fn validate_transition(self, next: TaskStatus) -> HashfleetResult<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(HashfleetError::InvalidStatusTransition {
                from: self,
                to: next,
            })
        }
    }

    /// 终止状态下不会再有子进程为该任务运行
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Stopped | TaskStatus::Exhausted | TaskStatus::Finished | TaskStatus::Error
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Queued => "Queued",
            TaskStatus::Dequeued => "Dequeued",
            TaskStatus::Running => "Running",
            TaskStatus::Stopping => "Stopping",
            TaskStatus::Stopped => "Stopped",
            TaskStatus::Exhausted => "Exhausted",
            TaskStatus::Finished => "Finished",
            TaskStatus::Error => "Error",
        };
        f.write_str(s)
    }
}

/// 任务优先级，序数越小越紧急
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
pub enum Priority {
    High = 0,
    #[default]
    Normal = 1,
    Low = 2,
}
