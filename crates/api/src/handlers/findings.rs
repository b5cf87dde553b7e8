use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use sentinel_core::models::FindingStatus;

use crate::error::ApiResult;
use crate::response::success;
use crate::routes::AppState;

#[derive(Debug, Deserialize)]
pub struct FindingQueryParams {
    pub status: Option<FindingStatus>,
}

/// 处置操作请求，带调用方读到的版本号
#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub expected_version: i64,
}

pub async fn list_findings(
    State(state): State<AppState>,
    Query(params): Query<FindingQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let findings = state.workflow.list(params.status).await?;
    Ok(success(findings))
}

pub async fn get_finding(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let finding = state.workflow.get(&id).await?;
    Ok(success(finding))
}

pub async fn begin_investigation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<TransitionRequest>,
) -> ApiResult<impl IntoResponse> {
    let finding = state
        .workflow
        .begin_investigation(&id, request.expected_version)
        .await?;
    Ok(success(finding))
}

pub async fn resolve_finding(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<TransitionRequest>,
) -> ApiResult<impl IntoResponse> {
    let finding = state
        .workflow
        .resolve(&id, request.expected_version)
        .await?;
    Ok(success(finding))
}

pub async fn mark_false_positive(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<TransitionRequest>,
) -> ApiResult<impl IntoResponse> {
    let finding = state
        .workflow
        .mark_false_positive(&id, request.expected_version)
        .await?;
    Ok(success(finding))
}
