use axum::{extract::Request, middleware::Next, response::Response};
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use tracing::{debug, warn};

/// 记录每个 RPC 请求的耗时，失败响应提升为 warn
pub async fn request_logging(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let response = next.run(request).await;
    let duration = start.elapsed();

    if response.status().is_client_error() || response.status().is_server_error() {
        warn!(
            "请求失败: {} {} - 状态: {} - 耗时: {:?}",
            method,
            uri,
            response.status(),
            duration
        );
    } else {
        debug!(
            "完成请求处理: {} {} - 状态: {} - 耗时: {:?}",
            method,
            uri,
            response.status(),
            duration
        );
    }

    response
}

/// 按 `Accept-Encoding` 协商 gzip 压缩
pub fn compression_layer() -> CompressionLayer {
    CompressionLayer::new().gzip(true)
}

pub fn trace_layer(
) -> TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>>
{
    TraceLayer::new_for_http()
}
