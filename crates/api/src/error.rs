use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use sentinel_core::errors::SentinelError;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("编排核心错误: {0}")]
    Sentinel(#[from] SentinelError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源")]
    NotFound,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            ApiError::Sentinel(SentinelError::JobNotFound { id }) => (
                StatusCode::NOT_FOUND,
                "JOB_NOT_FOUND",
                format!("任务 {id} 不存在"),
            ),
            ApiError::Sentinel(SentinelError::FindingNotFound { id }) => (
                StatusCode::NOT_FOUND,
                "FINDING_NOT_FOUND",
                format!("检出项 {id} 不存在"),
            ),
            ApiError::Sentinel(SentinelError::InvalidJobSpec(msg)) => (
                StatusCode::BAD_REQUEST,
                "INVALID_JOB_SPEC",
                format!("任务参数无效: {msg}"),
            ),
            ApiError::Sentinel(SentinelError::InvalidTransition { from, to }) => (
                StatusCode::CONFLICT,
                "INVALID_TRANSITION",
                format!("非法状态转换: {from} -> {to}"),
            ),
            ApiError::Sentinel(SentinelError::Conflict(msg)) => (
                StatusCode::CONFLICT,
                "CONFLICT",
                format!("并发修改冲突: {msg}"),
            ),
            ApiError::Sentinel(SentinelError::Serialization(msg)) => (
                StatusCode::BAD_REQUEST,
                "SERIALIZATION_ERROR",
                format!("请求数据格式错误: {msg}"),
            ),
            ApiError::Sentinel(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                e.to_string(),
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                format!("请求参数错误: {msg}"),
            ),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "请求的资源不存在".to_string(),
            ),
        };

        let body = Json(json!({
            "success": false,
            "error": {
                "type": error_type,
                "message": message,
            },
            "timestamp": chrono::Utc::now(),
        }));
        (status, body).into_response()
    }
}
