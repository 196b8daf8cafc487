//! 服务端与 Worker 之间的 JSON 线协议
//!
//! Worker 周期性地发送 [`BeaconRequest`]，服务端返回 [`BeaconResponse`]，
//! 其中按顺序携带新任务与状态变更命令。其余调用为同步的请求/响应，
//! 变更类调用成功时返回空的 2xx，失败时统一返回 [`RpcErrorBody`]。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{DeviceId, DeviceMap, Priority, TaskId, TaskStatus};

/// 文件内容摘要所在的响应头
pub const FILE_HASH_HEADER: &str = "x-content-sha256";

/// Worker 上一个正在运行的任务进程
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskProcess {
    pub pid: u32,
    /// 常驻内存（字节）
    pub memory_usage: u64,
    pub running_for_secs: u64,
    pub using_devices: Vec<DeviceId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BeaconRequest {
    pub worker_version: String,
    pub hostname: String,
    /// 只有在仍有空闲设备时才为 true
    pub request_new_task: bool,
    pub devices: DeviceMap,
    pub processes: HashMap<TaskId, TaskProcess>,
    #[serde(default)]
    pub engines: HashMap<String, String>,
}

impl BeaconRequest {
    pub fn running_task_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.processes.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BeaconResponse {
    pub server_time: DateTime<Utc>,
    pub payload: Vec<PayloadItem>,
}

/// 信标响应中的一条指令
///
/// 未知的 `type` 被反序列化为 [`PayloadItem::Unknown`] 并由 Worker 忽略。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum PayloadItem {
    NewTask(TaskAssignment),
    ChangeTaskStatus(StatusCommand),
    #[serde(other)]
    Unknown,
}

/// 调度器分配给主机的任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskAssignment {
    pub task_id: TaskId,
    pub priority: Priority,
    /// 任务绑定的设备，`None` 表示由 Worker 自行挑选
    pub devices: Option<Vec<DeviceId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCommand {
    pub task_id: TaskId,
    pub new_status: TaskStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeTaskStatusRequest {
    pub task_id: TaskId,
    pub new_status: TaskStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetTaskRequest {
    pub task_id: TaskId,
}

/// 子进程执行任务所需的完整配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskPayload {
    pub task_id: TaskId,
    pub task_name: String,
    pub priority: Priority,
    pub engine: String,
    pub engine_payload: serde_json::Value,
    pub file_id: String,
    #[serde(default)]
    pub engine_file_ids: Vec<String>,
    /// 最长运行秒数，0 表示不限
    #[serde(default)]
    pub task_duration: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Task,
    Engine,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetFileRequest {
    pub file_id: String,
    pub kind: FileKind,
}

/// 一条已破解的凭据
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrackedPasswordRequest {
    pub task_id: TaskId,
    pub hash: String,
    pub value: String,
    pub cracked_at: DateTime<Utc>,
}

/// 周期性或最终的引擎状态上报
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStatusRequest {
    pub task_id: TaskId,
    pub engine: String,
    pub payload: serde_json::Value,
    #[serde(rename = "final")]
    pub final_status: bool,
}

/// 所有失败调用的统一错误体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcErrorBody {
    pub status_code: u16,
    pub message: String,
}

/// 服务端登记的在线主机
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectedHost {
    pub hostname: String,
    pub last_checkin: DateTime<Utc>,
    pub beacon: BeaconRequest,
}
