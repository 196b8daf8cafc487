//! 存储层协作接口
//!
//! 调度器与 RPC 层只通过该 trait 访问任务、检查点和破解结果，
//! 具体的持久化方式不属于本系统。

use async_trait::async_trait;

use crate::errors::HashfleetResult;
use crate::models::{CrackedHash, DeviceId, FileKind, Task, TaskStatus};

/// 拉取待调度任务的请求
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingTasksRequest {
    pub hostname: String,
    pub devices_in_use: Vec<DeviceId>,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// 返回处于 `Queued` 的候选任务，实现可以预先按主机过滤
    async fn get_pending_tasks(&self, request: &PendingTasksRequest) -> HashfleetResult<Vec<Task>>;

    /// 按ID批量读取任务，不存在的ID被忽略
    async fn get_tasks(&self, task_ids: &[String]) -> HashfleetResult<Vec<Task>>;

    async fn get_task(&self, task_id: &str) -> HashfleetResult<Task>;

    /// 原子地把 `Queued` 任务标记为 `Dequeued` 并记录主机，任务已被他人取走时返回 false
    async fn dequeue_task(&self, task_id: &str, hostname: &str) -> HashfleetResult<bool>;

    /// 按状态机校验后持久化状态变更
    async fn change_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        error: Option<String>,
    ) -> HashfleetResult<()>;

    async fn save_task_checkpoint(&self, task_id: &str, data: Vec<u8>) -> HashfleetResult<()>;

    /// 没有检查点时返回 `None`
    async fn get_task_checkpoint(&self, task_id: &str) -> HashfleetResult<Option<Vec<u8>>>;

    async fn save_cracked_hash(&self, cracked: CrackedHash) -> HashfleetResult<()>;

    /// 没有该文件时返回 `None`
    async fn get_file(&self, file_id: &str, kind: FileKind) -> HashfleetResult<Option<Vec<u8>>>;
}
