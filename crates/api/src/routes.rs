use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use sentinel_classifier::FindingWorkflow;
use sentinel_queue::QueueManager;

use crate::handlers::{
    findings::{
        begin_investigation, get_finding, list_findings, mark_false_positive, resolve_finding,
    },
    health::health_check,
    jobs::{cancel_job, enqueue_job, get_job, queue_stats},
    system::get_system_stats,
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<QueueManager>,
    pub workflow: Arc<FindingWorkflow>,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // 任务API
        .route("/api/jobs", post(enqueue_job))
        .route("/api/jobs/{id}", get(get_job))
        .route("/api/jobs/{id}/cancel", post(cancel_job))
        .route("/api/queue/stats", get(queue_stats))
        // 检出项API
        .route("/api/findings", get(list_findings))
        .route("/api/findings/{id}", get(get_finding))
        .route("/api/findings/{id}/investigate", post(begin_investigation))
        .route("/api/findings/{id}/resolve", post(resolve_finding))
        .route("/api/findings/{id}/false-positive", post(mark_false_positive))
        // 系统监控API
        .route("/api/system/stats", get(get_system_stats))
        .with_state(state)
}
