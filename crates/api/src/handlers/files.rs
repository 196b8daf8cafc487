use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use hashfleet_core::models::{GetFileRequest, FILE_HASH_HEADER};
use hashfleet_core::HashfleetError;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{ApiError, ApiResult, RpcJson};
use crate::routes::AppState;

/// 返回文件内容，摘要放在 `x-content-sha256` 响应头中
///
/// Worker 先比较摘要，本地缓存一致时不会读取响应体。
pub async fn get_file(
    State(state): State<AppState>,
    RpcJson(request): RpcJson<GetFileRequest>,
) -> ApiResult<Response> {
    if request.file_id.trim().is_empty() {
        return Err(ApiError::BadRequest("file_id 不能为空".to_string()));
    }

    let content = state
        .storage
        .get_file(&request.file_id, request.kind)
        .await?
        .ok_or_else(|| HashfleetError::FileNotFound {
            id: request.file_id.clone(),
        })?;

    let hash = hex::encode(Sha256::digest(&content));
    debug!(
        "发送文件 {} ({:?}), {} 字节, sha256 {}",
        request.file_id,
        request.kind,
        content.len(),
        hash
    );

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::HeaderName::from_static(FILE_HASH_HEADER), hash),
        ],
        content,
    )
        .into_response())
}
