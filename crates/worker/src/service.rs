use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use sentinel_core::config::WorkerConfig;
use sentinel_core::errors::{SentinelError, SentinelResult};
use sentinel_core::models::{AnalysisReport, Job, JobOutcome, JobType};
use sentinel_core::traits::{AnalysisSink, CheckpointHandle, JobStore, TaskContext, TaskOutput};

use crate::executors::ExecutorRegistry;

/// Worker服务构建器
pub struct WorkerServiceBuilder {
    store: Arc<dyn JobStore>,
    registry: Arc<ExecutorRegistry>,
    sink: Option<Arc<dyn AnalysisSink>>,
    config: WorkerConfig,
    worker_id_base: String,
}

impl WorkerServiceBuilder {
    pub fn new(store: Arc<dyn JobStore>, config: WorkerConfig) -> Self {
        Self {
            store,
            registry: Arc::new(ExecutorRegistry::new()),
            sink: None,
            config,
            worker_id_base: hostname::get()
                .unwrap_or_else(|_| "sentinel".into())
                .to_string_lossy()
                .to_string(),
        }
    }

    pub fn registry(mut self, registry: Arc<ExecutorRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// 分析任务结果的下游接收方（通常是异常分类器）
    pub fn analysis_sink(mut self, sink: Arc<dyn AnalysisSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn worker_id_base(mut self, base: String) -> Self {
        self.worker_id_base = base;
        self
    }

    pub fn build(self) -> WorkerService {
        let (shutdown_tx, _) = broadcast::channel(1);
        WorkerService {
            store: self.store,
            registry: self.registry,
            sink: self.sink,
            config: self.config,
            worker_id_base: self.worker_id_base,
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }
}

/// Worker池
///
/// 每个Worker一个循环：阻塞取活、执行、回写结果，始终一次只跑一个任务。
/// 执行与超时用 select! 竞速，超时的任务记 failed 后立即回到取活循环。
pub struct WorkerService {
    store: Arc<dyn JobStore>,
    registry: Arc<ExecutorRegistry>,
    sink: Option<Arc<dyn AnalysisSink>>,
    config: WorkerConfig,
    worker_id_base: String,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl WorkerService {
    pub async fn start(&self) -> SentinelResult<()> {
        if !self.config.enabled {
            info!("Worker池未启用");
            return Ok(());
        }

        let mut handles = self.handles.lock().await;
        for n in 0..self.config.concurrency {
            let worker_id = format!("{}-{}", self.worker_id_base, n);
            let store = self.store.clone();
            let registry = self.registry.clone();
            let sink = self.sink.clone();
            let config = self.config.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                worker_loop(store, registry, sink, config, worker_id, shutdown_rx).await;
            }));
        }
        info!(
            concurrency = self.config.concurrency,
            worker_id_base = %self.worker_id_base,
            "Worker池已启动"
        );
        Ok(())
    }

    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(());
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        info!("Worker池已停止");
    }
}

async fn worker_loop(
    store: Arc<dyn JobStore>,
    registry: Arc<ExecutorRegistry>,
    sink: Option<Arc<dyn AnalysisSink>>,
    config: WorkerConfig,
    worker_id: String,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let claim_wait = Duration::from_secs(config.claim_wait_seconds);
    debug!(worker_id, "Worker循环启动");
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!(worker_id, "Worker收到停止信号");
                break;
            }
            claimed = store.claim_next(&worker_id, claim_wait) => {
                match claimed {
                    Ok(Some(job)) => {
                        execute_job(&store, &registry, sink.as_deref(), &config, &worker_id, job)
                            .await;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(worker_id, "取活失败: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

async fn execute_job(
    store: &Arc<dyn JobStore>,
    registry: &ExecutorRegistry,
    sink: Option<&dyn AnalysisSink>,
    config: &WorkerConfig,
    worker_id: &str,
    job: Job,
) {
    let job_id = job.id.clone();
    let job_type = job.job_type;
    let timeout = Duration::from_secs(job.timeout_seconds);
    info!(
        worker_id,
        job_id = %job_id,
        job_type = job_type.as_str(),
        "开始执行任务"
    );
    metrics::gauge!("sentinel_worker_running_jobs").increment(1.0);

    let handle = CheckpointHandle::new(
        store.clone(),
        job_id.clone(),
        Duration::from_secs(config.checkpoint_interval_seconds),
    );
    let tenant_id = job.tenant_id.clone();
    let ctx = TaskContext::new(job, handle);
    let executor = registry.for_type(job_type);

    let result = tokio::select! {
        exec = executor.execute(&ctx) => Some(exec),
        _ = tokio::time::sleep(timeout) => None,
    };

    let write_back = match result {
        None => {
            warn!(worker_id, job_id = %job_id, "任务执行超时，强制失败");
            metrics::counter!("sentinel_jobs_timed_out_total").increment(1);
            store
                .complete_job(
                    &job_id,
                    JobOutcome::Failure {
                        error: SentinelError::TimeoutExceeded {
                            timeout_seconds: timeout.as_secs(),
                        }
                        .to_string(),
                    },
                )
                .await
        }
        Some(Ok(TaskOutput::Completed(value))) => {
            info!(worker_id, job_id = %job_id, "任务执行成功");
            metrics::counter!("sentinel_jobs_finished_total").increment(1);
            let completed = store
                .complete_job(
                    &job_id,
                    JobOutcome::Success {
                        result: value.clone(),
                    },
                )
                .await;
            if completed.is_ok() && job_type == JobType::Analysis {
                if let Some(sink) = sink {
                    hand_off_analysis(sink, &tenant_id, &job_id, &value).await;
                }
            }
            completed
        }
        Some(Ok(TaskOutput::Cancelled)) => {
            info!(worker_id, job_id = %job_id, "任务在检查点观察到取消请求");
            metrics::counter!("sentinel_jobs_cancelled_total").increment(1);
            store.mark_cancelled(&job_id).await
        }
        Some(Err(e)) => {
            warn!(worker_id, job_id = %job_id, "任务执行失败: {}", e);
            metrics::counter!("sentinel_jobs_failed_total").increment(1);
            store
                .complete_job(
                    &job_id,
                    JobOutcome::Failure {
                        error: e.to_string(),
                    },
                )
                .await
        }
    };
    if let Err(e) = write_back {
        error!(worker_id, job_id = %job_id, "回写任务结果失败: {}", e);
    }
    metrics::gauge!("sentinel_worker_running_jobs").decrement(1.0);
}

/// 分析结果交给下游分类。分类失败只记日志，不影响任务终态。
async fn hand_off_analysis(
    sink: &dyn AnalysisSink,
    tenant_id: &str,
    job_id: &str,
    result: &serde_json::Value,
) {
    let report = match AnalysisReport::from_result(result) {
        Ok(report) => report,
        Err(e) => {
            warn!(job_id, "分析结果不是可分类的结构: {}", e);
            return;
        }
    };
    match sink.ingest(tenant_id, job_id, &report).await {
        Ok(findings) => {
            if !findings.is_empty() {
                info!(job_id, count = findings.len(), "分析结果产生检出项");
            }
        }
        Err(e) => warn!(job_id, "检出项摄入失败: {}", e),
    }
}
