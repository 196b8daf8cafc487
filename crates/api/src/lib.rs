//! # Hashfleet API
//!
//! Worker 与服务端之间的 RPC 服务，基于 Axum 构建，所有路由位于 `/rpc/v1` 下。
//!
//! ## API 端点
//!
//! - `POST /beacon` - Worker 信标，返回按顺序执行的指令
//! - `POST /task/status_change` - 上报任务状态变更
//! - `POST /task/payload` - 获取任务配置
//! - `POST /file` - 获取任务文件或引擎文件，摘要在 `x-content-sha256` 响应头中
//! - `POST /task/cracked` - 上报一条破解结果
//! - `POST /task/status` - 上报引擎状态
//! - `POST /task/checkpoint/{task_id}` - 上传检查点
//! - `GET /task/checkpoint/{task_id}` - 下载检查点，不存在时返回 204
//! - `GET /workers` - 登记过的主机
//!
//! ## 错误格式
//!
//! 所有失败调用返回 `{"status_code": 400, "message": "..."}`，
//! 变更类调用成功时返回空的 2xx。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod tls;

use axum::Router;
use tower::ServiceBuilder;

use middleware::{compression_layer, request_logging, trace_layer};
pub use routes::{create_routes, AppState, RPC_PREFIX};

/// 创建完整的API应用
pub fn create_app(state: AppState) -> Router {
    create_routes(state).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(compression_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    )
}
