use std::sync::Arc;

use tracing::{info, warn};

use sentinel_core::errors::{SentinelError, SentinelResult};
use sentinel_core::models::{Job, JobPriority, JobView, NewJob, QueueStats};
use sentinel_core::traits::{CancelOutcome, JobStore};

/// 队列管理器
///
/// 入队、状态查询、取消、统计的唯一入口。存储客户端显式注入，
/// 同一进程可以建多个实例指向不同的存储。
pub struct QueueManager {
    store: Arc<dyn JobStore>,
}

impl QueueManager {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    /// 入队。未知优先级回落到 default（记录警告），
    /// 超时与结果保留期必须为正。
    pub async fn enqueue(&self, spec: NewJob) -> SentinelResult<JobView> {
        if spec.timeout_seconds == 0 {
            return Err(SentinelError::invalid_spec("timeout_seconds 必须为正"));
        }
        if spec.result_ttl_seconds == 0 {
            return Err(SentinelError::invalid_spec("result_ttl_seconds 必须为正"));
        }

        let (priority, corrected) = JobPriority::parse_lossy(&spec.priority);
        if corrected {
            warn!(
                raw = %spec.priority,
                fallback = priority.as_str(),
                "未知的优先级层级，回落到 default"
            );
            metrics::counter!("sentinel_enqueue_priority_corrected_total").increment(1);
        }

        let job = Job::new(spec, priority);
        self.store.insert_job(&job).await?;
        metrics::counter!(
            "sentinel_jobs_enqueued_total",
            "priority" => priority.as_str(),
            "job_type" => job.job_type.as_str()
        )
        .increment(1);
        info!(
            job_id = %job.id,
            job_type = job.job_type.as_str(),
            priority = priority.as_str(),
            tenant_id = %job.tenant_id,
            "任务已入队"
        );
        Ok(JobView::from(&job))
    }

    /// 任务快照；记录已过保留期时返回 JobNotFound
    pub async fn status(&self, job_id: &str) -> SentinelResult<JobView> {
        let job = self.store.get_job(job_id).await?;
        Ok(JobView::from(&job))
    }

    /// 请求取消。队列中的任务直接出队；执行中的置取消标志，
    /// 由Worker在下一个检查点观察到。
    pub async fn cancel(&self, job_id: &str) -> SentinelResult<CancelOutcome> {
        let outcome = self.store.request_cancel(job_id).await?;
        if outcome != CancelOutcome::AlreadyTerminal {
            metrics::counter!("sentinel_jobs_cancel_requested_total").increment(1);
        }
        Ok(outcome)
    }

    /// 按优先级聚合的统计，纯观测
    pub async fn stats(&self) -> SentinelResult<QueueStats> {
        self.store.queue_stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::models::{JobStatus, JobType};
    use sentinel_infrastructure::MemoryJobStore;
    use std::collections::HashMap;

    fn manager() -> QueueManager {
        QueueManager::new(Arc::new(MemoryJobStore::new()))
    }

    fn spec(priority: &str) -> NewJob {
        NewJob {
            job_type: JobType::Scan,
            priority: priority.to_string(),
            tenant_id: "tenant-1".to_string(),
            payload: serde_json::json!({"target": "10.0.0.0/24"}),
            attributes: HashMap::new(),
            timeout_seconds: 300,
            result_ttl_seconds: 600,
        }
    }

    #[tokio::test]
    async fn test_enqueue_and_status() {
        let manager = manager();
        let view = manager.enqueue(spec("high")).await.unwrap();
        assert_eq!(view.status, JobStatus::Queued);
        assert_eq!(view.priority, JobPriority::High);

        let fetched = manager.status(&view.id).await.unwrap();
        assert_eq!(fetched.id, view.id);
    }

    #[tokio::test]
    async fn test_unknown_priority_falls_back_to_default() {
        let manager = manager();
        let view = manager.enqueue(spec("urgent")).await.unwrap();
        assert_eq!(view.priority, JobPriority::Default);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_zero_durations() {
        let manager = manager();

        let mut bad = spec("default");
        bad.timeout_seconds = 0;
        assert!(matches!(
            manager.enqueue(bad).await,
            Err(SentinelError::InvalidJobSpec(_))
        ));

        let mut bad = spec("default");
        bad.result_ttl_seconds = 0;
        assert!(matches!(
            manager.enqueue(bad).await,
            Err(SentinelError::InvalidJobSpec(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_queued_job() {
        let manager = manager();
        let view = manager.enqueue(spec("low")).await.unwrap();

        let outcome = manager.cancel(&view.id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Dequeued);
        assert_eq!(
            manager.status(&view.id).await.unwrap().status,
            JobStatus::Cancelled
        );
        // 重复取消无效果
        assert_eq!(
            manager.cancel(&view.id).await.unwrap(),
            CancelOutcome::AlreadyTerminal
        );
    }

    #[tokio::test]
    async fn test_status_of_unknown_job() {
        let manager = manager();
        assert!(matches!(
            manager.status("no-such-id").await,
            Err(SentinelError::JobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_stats_reflect_queue_depth() {
        let manager = manager();
        manager.enqueue(spec("high")).await.unwrap();
        manager.enqueue(spec("high")).await.unwrap();
        manager.enqueue(spec("low")).await.unwrap();

        let stats = manager.stats().await.unwrap();
        assert_eq!(stats.high.queued, 2);
        assert_eq!(stats.low.queued, 1);
        assert_eq!(stats.default.queued, 0);
    }
}
