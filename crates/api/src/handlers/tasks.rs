use axum::{extract::State, http::StatusCode, Json};
use hashfleet_core::models::{
    ChangeTaskStatusRequest, CrackedHash, CrackedPasswordRequest, GetTaskRequest, TaskPayload,
    TaskStatusRequest,
};
use tracing::{debug, info};

use super::require_task_id;
use crate::error::{ApiResult, RpcJson};
use crate::routes::AppState;

/// Worker 上报任务状态变更
///
/// 状态机校验由存储层完成，非法转换返回 400 且不发布事件。
pub async fn change_task_status(
    State(state): State<AppState>,
    RpcJson(request): RpcJson<ChangeTaskStatusRequest>,
) -> ApiResult<StatusCode> {
    require_task_id(&request.task_id)?;

    state
        .storage
        .change_task_status(&request.task_id, request.new_status, request.error.clone())
        .await?;
    info!(
        "任务 {} 状态变更为 {}{}",
        request.task_id,
        request.new_status,
        request
            .error
            .as_deref()
            .map(|e| format!(": {e}"))
            .unwrap_or_default()
    );

    state
        .worker_manager
        .broadcast_task_status(request.task_id, request.new_status, request.error)
        .await;
    Ok(StatusCode::OK)
}

/// 返回子进程执行任务所需的配置
pub async fn get_task_payload(
    State(state): State<AppState>,
    RpcJson(request): RpcJson<GetTaskRequest>,
) -> ApiResult<Json<TaskPayload>> {
    require_task_id(&request.task_id)?;

    let task = state.storage.get_task(&request.task_id).await?;
    Ok(Json(TaskPayload {
        task_id: task.id,
        task_name: task.name,
        priority: task.priority,
        engine: task.engine,
        engine_payload: task.engine_payload,
        file_id: task.file_id,
        engine_file_ids: task.engine_file_ids,
        task_duration: task.task_duration,
    }))
}

pub async fn save_cracked_password(
    State(state): State<AppState>,
    RpcJson(request): RpcJson<CrackedPasswordRequest>,
) -> ApiResult<StatusCode> {
    require_task_id(&request.task_id)?;

    state
        .storage
        .save_cracked_hash(CrackedHash::from(request.clone()))
        .await?;
    state.metrics.record_cracked();
    debug!("任务 {} 破解了一条哈希", request.task_id);

    state.worker_manager.broadcast_cracked_password(request).await;
    Ok(StatusCode::OK)
}

/// 引擎状态上报，`final` 为 true 时额外发布最终状态
pub async fn send_task_status(
    State(state): State<AppState>,
    RpcJson(request): RpcJson<TaskStatusRequest>,
) -> ApiResult<StatusCode> {
    require_task_id(&request.task_id)?;

    if request.final_status {
        info!("任务 {} 上报最终引擎状态", request.task_id);
        state
            .worker_manager
            .broadcast_final_status(request.clone())
            .await;
    }
    state.worker_manager.broadcast_engine_status(request).await;
    Ok(StatusCode::OK)
}
