use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use hashfleet_core::models::{CrackedHash, FileKind, Task, TaskStatus};
use hashfleet_core::traits::{PendingTasksRequest, StorageBackend};
use hashfleet_core::{HashfleetError, HashfleetResult};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct StorageState {
    tasks: HashMap<String, Task>,
    checkpoints: HashMap<String, Vec<u8>>,
    cracked: Vec<CrackedHash>,
    files: HashMap<(String, FileKind), Vec<u8>>,
}

/// 内存存储实现
///
/// 供单机部署与测试使用，进程退出后数据丢失。
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    state: Arc<RwLock<StorageState>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入或覆盖一个任务
    pub async fn put_task(&self, task: Task) {
        let mut state = self.state.write().await;
        state.tasks.insert(task.id.clone(), task);
    }

    pub async fn put_file(&self, file_id: &str, kind: FileKind, data: Vec<u8>) {
        let mut state = self.state.write().await;
        state.files.insert((file_id.to_string(), kind), data);
    }

    pub async fn cracked_hashes(&self, task_id: &str) -> Vec<CrackedHash> {
        let state = self.state.read().await;
        state
            .cracked
            .iter()
            .filter(|c| c.task_id == task_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl StorageBackend for InMemoryStorage {
    async fn get_pending_tasks(&self, request: &PendingTasksRequest) -> HashfleetResult<Vec<Task>> {
        let state = self.state.read().await;
        Ok(state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Queued)
            .filter(|t| t.assigned_to_host.is_empty() || t.assigned_to_host == request.hostname)
            .cloned()
            .collect())
    }

    async fn get_tasks(&self, task_ids: &[String]) -> HashfleetResult<Vec<Task>> {
        let state = self.state.read().await;
        Ok(task_ids
            .iter()
            .filter_map(|id| state.tasks.get(id).cloned())
            .collect())
    }

    async fn get_task(&self, task_id: &str) -> HashfleetResult<Task> {
        let state = self.state.read().await;
        state
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| HashfleetError::TaskNotFound {
                id: task_id.to_string(),
            })
    }

    async fn dequeue_task(&self, task_id: &str, hostname: &str) -> HashfleetResult<bool> {
        let mut state = self.state.write().await;
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| HashfleetError::TaskNotFound {
                id: task_id.to_string(),
            })?;

        if task.status != TaskStatus::Queued {
            return Ok(false);
        }

        task.status = TaskStatus::Dequeued;
        task.dequeued_by = Some(hostname.to_string());
        task.updated_at = Utc::now();
        debug!("任务 {} 已分配给主机 {}", task_id, hostname);
        Ok(true)
    }

    async fn change_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        error: Option<String>,
    ) -> HashfleetResult<()> {
        let mut state = self.state.write().await;
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| HashfleetError::TaskNotFound {
                id: task_id.to_string(),
            })?;

        task.status.validate_transition(status)?;
        task.status = status;
        task.error = error;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn save_task_checkpoint(&self, task_id: &str, data: Vec<u8>) -> HashfleetResult<()> {
        let mut state = self.state.write().await;
        if !state.tasks.contains_key(task_id) {
            return Err(HashfleetError::TaskNotFound {
                id: task_id.to_string(),
            });
        }
        state.checkpoints.insert(task_id.to_string(), data);
        Ok(())
    }

    async fn get_task_checkpoint(&self, task_id: &str) -> HashfleetResult<Option<Vec<u8>>> {
        let state = self.state.read().await;
        Ok(state.checkpoints.get(task_id).cloned())
    }

    async fn save_cracked_hash(&self, cracked: CrackedHash) -> HashfleetResult<()> {
        let mut state = self.state.write().await;
        let duplicate = state
            .cracked
            .iter()
            .any(|c| c.task_id == cracked.task_id && c.hash == cracked.hash);
        if !duplicate {
            state.cracked.push(cracked);
        }
        Ok(())
    }

    async fn get_file(&self, file_id: &str, kind: FileKind) -> HashfleetResult<Option<Vec<u8>>> {
        let state = self.state.read().await;
        Ok(state.files.get(&(file_id.to_string(), kind)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashfleet_core::models::Priority;

    #[tokio::test]
    async fn test_dequeue_is_compare_and_set() {
        let storage = InMemoryStorage::new();
        storage.put_task(Task::new("t1", "wordlist", Priority::Normal)).await;

        assert!(storage.dequeue_task("t1", "h1").await.unwrap());
        assert!(!storage.dequeue_task("t1", "h2").await.unwrap());

        let task = storage.get_task("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Dequeued);
        assert_eq!(task.dequeued_by.as_deref(), Some("h1"));
        assert!(task.assigned_to_host.is_empty());
    }

    #[tokio::test]
    async fn test_requeued_task_keeps_any_host_affinity() {
        let storage = InMemoryStorage::new();
        storage.put_task(Task::new("t1", "wordlist", Priority::Normal)).await;

        assert!(storage.dequeue_task("t1", "h1").await.unwrap());
        storage
            .change_task_status("t1", TaskStatus::Error, Some("h1 无法启动任务".into()))
            .await
            .unwrap();
        storage
            .change_task_status("t1", TaskStatus::Queued, None)
            .await
            .unwrap();

        let pending = storage
            .get_pending_tasks(&PendingTasksRequest {
                hostname: "h2".into(),
                ..PendingTasksRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert!(storage.dequeue_task("t1", "h2").await.unwrap());
        assert_eq!(
            storage.get_task("t1").await.unwrap().dequeued_by.as_deref(),
            Some("h2")
        );
    }

    #[tokio::test]
    async fn test_illegal_status_change_is_rejected() {
        let storage = InMemoryStorage::new();
        storage.put_task(Task::new("t1", "wordlist", Priority::Normal)).await;

        let err = storage
            .change_task_status("t1", TaskStatus::Finished, None)
            .await
            .unwrap_err();
        assert!(matches!(err, HashfleetError::InvalidStatusTransition { .. }));
        assert_eq!(
            storage.get_task("t1").await.unwrap().status,
            TaskStatus::Queued
        );
    }

    #[tokio::test]
    async fn test_missing_checkpoint_is_none() {
        let storage = InMemoryStorage::new();
        storage.put_task(Task::new("t1", "wordlist", Priority::Normal)).await;
        assert!(storage.get_task_checkpoint("t1").await.unwrap().is_none());

        storage.save_task_checkpoint("t1", vec![1, 2, 3]).await.unwrap();
        assert_eq!(
            storage.get_task_checkpoint("t1").await.unwrap(),
            Some(vec![1, 2, 3])
        );
    }

    #[tokio::test]
    async fn test_cracked_hash_is_not_duplicated() {
        let storage = InMemoryStorage::new();
        let cracked = CrackedHash {
            task_id: "t1".into(),
            hash: "deadbeef".into(),
            value: "hello".into(),
            cracked_at: Utc::now(),
        };
        storage.save_cracked_hash(cracked.clone()).await.unwrap();
        storage.save_cracked_hash(cracked).await.unwrap();
        assert_eq!(storage.cracked_hashes("t1").await.len(), 1);
    }
}
