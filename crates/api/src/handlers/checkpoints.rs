use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{debug, info};

use super::require_task_id;
use crate::error::ApiResult;
use crate::routes::AppState;

pub async fn save_checkpoint(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    require_task_id(&task_id)?;

    info!("保存任务 {} 的检查点, {} 字节", task_id, body.len());
    state
        .storage
        .save_task_checkpoint(&task_id, body.to_vec())
        .await?;
    Ok(StatusCode::OK)
}

/// 没有检查点时返回 204，与传输失败区分
pub async fn get_checkpoint(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Response> {
    require_task_id(&task_id)?;

    match state.storage.get_task_checkpoint(&task_id).await? {
        Some(data) => Ok((
            [(header::CONTENT_TYPE, "application/octet-stream")],
            data,
        )
            .into_response()),
        None => {
            debug!("任务 {} 没有检查点", task_id);
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}
