use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use hashfleet_core::traits::StorageBackend;
use hashfleet_dispatcher::{TaskScheduler, WorkerManager};
use hashfleet_infrastructure::MetricsCollector;

use crate::handlers::{
    beacon::beacon,
    checkpoints::{get_checkpoint, save_checkpoint},
    files::get_file,
    tasks::{change_task_status, get_task_payload, save_cracked_password, send_task_status},
    workers::list_workers,
};

/// 所有 RPC 路由的公共前缀
pub const RPC_PREFIX: &str = "/rpc/v1";

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn StorageBackend>,
    pub scheduler: Arc<TaskScheduler>,
    pub worker_manager: Arc<WorkerManager>,
    pub metrics: Arc<MetricsCollector>,
}

impl AppState {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            scheduler: Arc::new(TaskScheduler::new(Arc::clone(&storage))),
            storage,
            worker_manager: Arc::new(WorkerManager::new()),
            metrics: Arc::new(MetricsCollector::new()),
        }
    }
}

/// 创建RPC路由
pub fn create_routes(state: AppState) -> Router {
    let rpc = Router::new()
        .route("/beacon", post(beacon))
        .route("/task/status_change", post(change_task_status))
        .route("/task/payload", post(get_task_payload))
        .route("/task/cracked", post(save_cracked_password))
        .route("/task/status", post(send_task_status))
        .route(
            "/task/checkpoint/{task_id}",
            get(get_checkpoint).post(save_checkpoint),
        )
        .route("/file", post(get_file))
        .route("/workers", get(list_workers));

    Router::new().nest(RPC_PREFIX, rpc).with_state(state)
}
