pub mod beacon;
pub mod checkpoints;
pub mod files;
pub mod tasks;
pub mod workers;

use crate::error::{ApiError, ApiResult};

/// 拒绝空的任务ID
pub(crate) fn require_task_id(task_id: &str) -> ApiResult<()> {
    if task_id.trim().is_empty() {
        return Err(ApiError::BadRequest("task_id 不能为空".to_string()));
    }
    Ok(())
}
