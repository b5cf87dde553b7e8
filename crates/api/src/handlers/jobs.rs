use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};

use sentinel_core::models::NewJob;

use crate::error::ApiResult;
use crate::response::{created, success};
use crate::routes::AppState;

/// 提交任务
pub async fn enqueue_job(
    State(state): State<AppState>,
    Json(spec): Json<NewJob>,
) -> ApiResult<impl IntoResponse> {
    let view = state.queue.enqueue(spec).await?;
    Ok(created(view))
}

/// 任务状态快照
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let view = state.queue.status(&id).await?;
    Ok(success(view))
}

/// 请求取消任务
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state.queue.cancel(&id).await?;
    Ok(success(serde_json::json!({ "outcome": outcome })))
}

/// 按优先级聚合的队列统计
pub async fn queue_stats(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let stats = state.queue.stats().await?;
    Ok(success(stats))
}
