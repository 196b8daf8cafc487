use axum::{extract::State, Json};
use chrono::Utc;
use hashfleet_core::models::{BeaconRequest, BeaconResponse, PayloadItem};
use tracing::debug;

use crate::error::{ApiError, ApiResult, RpcJson};
use crate::routes::AppState;

/// 处理 Worker 信标
///
/// 登记主机状态后由调度器生成本次下发的指令，调度失败时返回空指令列表。
pub async fn beacon(
    State(state): State<AppState>,
    RpcJson(request): RpcJson<BeaconRequest>,
) -> ApiResult<Json<BeaconResponse>> {
    if request.hostname.trim().is_empty() {
        return Err(ApiError::BadRequest("hostname 不能为空".to_string()));
    }

    let connected = state.worker_manager.record_beacon(&request).await;
    state.metrics.record_beacon(connected);
    debug!(
        "收到主机 {} 的信标: 版本 {}, 运行中任务 {}, 请求新任务 {}",
        request.hostname,
        request.worker_version,
        request.processes.len(),
        request.request_new_task
    );

    let payload = state.scheduler.pending_work(&request).await;
    for item in &payload {
        if matches!(item, PayloadItem::NewTask(_)) {
            state.metrics.record_task_assigned();
        }
    }

    Ok(Json(BeaconResponse {
        server_time: Utc::now(),
        payload,
    }))
}
