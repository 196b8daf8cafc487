use axum::{extract::State, Json};
use hashfleet_core::models::ConnectedHost;

use crate::routes::AppState;

/// 获取登记过的主机列表，包含最近一次信标中的设备与进程信息
pub async fn list_workers(State(state): State<AppState>) -> Json<Vec<ConnectedHost>> {
    Json(state.worker_manager.connected_hosts().await)
}
