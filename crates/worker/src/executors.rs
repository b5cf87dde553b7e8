use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::json;
use tracing::debug;

use sentinel_core::errors::{SentinelError, SentinelResult};
use sentinel_core::models::JobType;
use sentinel_core::traits::{Checkpoint, CheckpointHandle, TaskContext, TaskExecutor, TaskOutput};

/// 按任务类型的封闭映射，编译期保证每种类型都有执行器
pub struct ExecutorRegistry {
    scan: Arc<dyn TaskExecutor>,
    analysis: Arc<dyn TaskExecutor>,
    report: Arc<dyn TaskExecutor>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            scan: Arc::new(ScanExecutor),
            analysis: Arc::new(AnalysisExecutor),
            report: Arc::new(ReportExecutor),
        }
    }

    pub fn for_type(&self, job_type: JobType) -> Arc<dyn TaskExecutor> {
        match job_type {
            JobType::Scan => self.scan.clone(),
            JobType::Analysis => self.analysis.clone(),
            JobType::Report => self.report.clone(),
        }
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 单个工作阶段的模拟时长，payload 可用 phase_duration_ms 覆盖
fn phase_duration(payload: &serde_json::Value) -> Duration {
    let ms = payload
        .get("phase_duration_ms")
        .and_then(|v| v.as_u64())
        .unwrap_or(25);
    Duration::from_millis(ms)
}

/// 执行一个阶段：先写进度与阶段名，然后按检查点间隔切片等待，
/// 每片之间轮询取消标志。
async fn run_phase(
    handle: &CheckpointHandle,
    phase: &str,
    progress: u8,
    duration: Duration,
) -> SentinelResult<Checkpoint> {
    if handle.checkpoint(progress, Some(phase)).await? == Checkpoint::CancelRequested {
        return Ok(Checkpoint::CancelRequested);
    }
    let mut remaining = duration;
    while !remaining.is_zero() {
        let slice = remaining.min(handle.interval());
        tokio::time::sleep(slice).await;
        remaining = remaining.saturating_sub(slice);
        if !remaining.is_zero()
            && handle.checkpoint(progress, None).await? == Checkpoint::CancelRequested
        {
            return Ok(Checkpoint::CancelRequested);
        }
    }
    Ok(Checkpoint::Continue)
}

/// 网络扫描任务
pub struct ScanExecutor;

#[async_trait]
impl TaskExecutor for ScanExecutor {
    fn name(&self) -> &str {
        "scan"
    }

    async fn execute(&self, ctx: &TaskContext) -> SentinelResult<TaskOutput> {
        let duration = phase_duration(&ctx.job.payload);
        let target = ctx
            .job
            .payload
            .get("target")
            .and_then(|v| v.as_str())
            .unwrap_or("*");
        debug!(job_id = %ctx.job.id, target, "开始扫描");

        for (phase, progress) in [("port_sweep", 20u8), ("service_probe", 55), ("banner_grab", 85)] {
            if run_phase(&ctx.handle, phase, progress, duration).await?
                == Checkpoint::CancelRequested
            {
                return Ok(TaskOutput::Cancelled);
            }
        }

        let mut rng = rand::rng();
        let hosts_scanned: u32 = rng.random_range(1..=64);
        Ok(TaskOutput::Completed(json!({
            "target": target,
            "hosts_scanned": hosts_scanned,
            "open_ports": rng.random_range(0..=hosts_scanned * 3),
        })))
    }
}

/// 流量/日志分析任务
///
/// payload 自带 observations 时原样产出（上游引擎已打分），
/// 否则生成模拟打分。产出结构是分类器的摄入格式。
pub struct AnalysisExecutor;

#[async_trait]
impl TaskExecutor for AnalysisExecutor {
    fn name(&self) -> &str {
        "analysis"
    }

    async fn execute(&self, ctx: &TaskContext) -> SentinelResult<TaskOutput> {
        let duration = phase_duration(&ctx.job.payload);

        for (phase, progress) in [("normalize", 30u8), ("score", 75)] {
            if run_phase(&ctx.handle, phase, progress, duration).await?
                == Checkpoint::CancelRequested
            {
                return Ok(TaskOutput::Cancelled);
            }
        }

        let observations = match ctx.job.payload.get("observations") {
            Some(observations) if observations.is_array() => observations.clone(),
            Some(_) => {
                return Err(SentinelError::TaskFailure(
                    "observations 必须是打分观测数组".to_string(),
                ))
            }
            None => {
                let mut rng = rand::rng();
                json!([
                    {"label": "beacon_interval", "score": rng.random_range(0.0..1.0)},
                    {"label": "rare_user_agent", "score": rng.random_range(0.0..1.0)},
                ])
            }
        };
        Ok(TaskOutput::Completed(json!({ "observations": observations })))
    }
}

/// 报告生成任务
pub struct ReportExecutor;

#[async_trait]
impl TaskExecutor for ReportExecutor {
    fn name(&self) -> &str {
        "report"
    }

    async fn execute(&self, ctx: &TaskContext) -> SentinelResult<TaskOutput> {
        let duration = phase_duration(&ctx.job.payload);

        for (phase, progress) in [("collect", 40u8), ("render", 80)] {
            if run_phase(&ctx.handle, phase, progress, duration).await?
                == Checkpoint::CancelRequested
            {
                return Ok(TaskOutput::Cancelled);
            }
        }

        let sections = ctx
            .job
            .payload
            .get("sections")
            .and_then(|v| v.as_u64())
            .unwrap_or(3);
        Ok(TaskOutput::Completed(json!({
            "report": {
                "tenant_id": ctx.job.tenant_id,
                "sections": sections,
                "generated_at": chrono::Utc::now().to_rfc3339(),
            }
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::models::{Job, JobPriority, NewJob};
    use sentinel_core::traits::JobStore;
    use sentinel_infrastructure::MemoryJobStore;
    use std::collections::HashMap;

    async fn started_ctx(payload: serde_json::Value) -> (Arc<MemoryJobStore>, TaskContext) {
        let store = Arc::new(MemoryJobStore::new());
        let job = Job::new(
            NewJob {
                job_type: JobType::Analysis,
                priority: "default".to_string(),
                tenant_id: "tenant-1".to_string(),
                payload,
                attributes: HashMap::new(),
                timeout_seconds: 60,
                result_ttl_seconds: 600,
            },
            JobPriority::Default,
        );
        store.insert_job(&job).await.unwrap();
        let claimed = store
            .claim_next("w1", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        let handle = CheckpointHandle::new(
            store.clone() as Arc<dyn JobStore>,
            claimed.id.clone(),
            Duration::from_millis(10),
        );
        (store, TaskContext::new(claimed, handle))
    }

    #[test]
    fn test_registry_is_exhaustive() {
        let registry = ExecutorRegistry::new();
        assert_eq!(registry.for_type(JobType::Scan).name(), "scan");
        assert_eq!(registry.for_type(JobType::Analysis).name(), "analysis");
        assert_eq!(registry.for_type(JobType::Report).name(), "report");
    }

    #[tokio::test]
    async fn test_analysis_passes_through_observations() {
        let payload = json!({
            "phase_duration_ms": 1,
            "observations": [{"label": "beacon", "score": 0.85}],
        });
        let (_store, ctx) = started_ctx(payload).await;

        let output = AnalysisExecutor.execute(&ctx).await.unwrap();
        match output {
            TaskOutput::Completed(result) => {
                assert_eq!(result["observations"][0]["label"], "beacon");
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_analysis_rejects_malformed_observations() {
        let payload = json!({
            "phase_duration_ms": 1,
            "observations": "not-a-list",
        });
        let (_store, ctx) = started_ctx(payload).await;

        let err = AnalysisExecutor.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, SentinelError::TaskFailure(_)));
    }

    #[tokio::test]
    async fn test_executor_observes_cancel_at_checkpoint() {
        let (store, ctx) = started_ctx(json!({"phase_duration_ms": 1})).await;
        store.request_cancel(&ctx.job.id).await.unwrap();

        let output = AnalysisExecutor.execute(&ctx).await.unwrap();
        assert_eq!(output, TaskOutput::Cancelled);
    }

    #[tokio::test]
    async fn test_phases_update_progress() {
        let (store, ctx) = started_ctx(json!({"phase_duration_ms": 1})).await;
        AnalysisExecutor.execute(&ctx).await.unwrap();

        let job = store.get_job(&ctx.job.id).await.unwrap();
        assert!(job.progress >= 75);
        assert_eq!(job.meta.current_phase.as_deref(), Some("score"));
    }
}
