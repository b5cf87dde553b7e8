use std::collections::HashMap;

use axum::{extract::State, response::IntoResponse};
use serde_json::json;

use crate::error::ApiResult;
use crate::response::success;
use crate::routes::AppState;

/// 系统级统计：队列深度 + 检出项状态分布
pub async fn get_system_stats(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let queue = state.queue.stats().await?;
    let findings: HashMap<String, u64> = state
        .workflow
        .counts()
        .await?
        .into_iter()
        .map(|(status, count)| (status.as_str().to_string(), count))
        .collect();

    Ok(success(json!({
        "queue": queue,
        "findings": findings,
    })))
}
