use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::interval;
use tracing::{error, info, warn};

use sentinel_core::config::WatchdogConfig;
use sentinel_core::errors::{SentinelError, SentinelResult};
use sentinel_core::models::JobOutcome;
use sentinel_core::traits::JobStore;

/// 超时看门狗
///
/// 周期扫描 started 任务，超过执行期限的强制转入 failed。
/// Worker 自身也会对执行体做超时竞速，看门狗兜底Worker崩溃后
/// 留下的孤儿任务。结果写一次的保证使两边的竞争无害。
pub struct TimeoutWatchdog {
    store: Arc<dyn JobStore>,
    config: WatchdogConfig,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    scan_handle: Option<tokio::task::JoinHandle<()>>,
}

impl TimeoutWatchdog {
    pub fn new(store: Arc<dyn JobStore>, config: WatchdogConfig) -> Self {
        Self {
            store,
            config,
            shutdown_tx: None,
            scan_handle: None,
        }
    }

    pub async fn start(&mut self) -> SentinelResult<()> {
        if !self.config.enabled {
            info!("超时看门狗未启用");
            return Ok(());
        }

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let store = self.store.clone();
        let scan_interval_seconds = self.config.scan_interval_seconds;

        let handle = tokio::spawn(async move {
            let mut scan_interval = interval(Duration::from_secs(scan_interval_seconds));
            loop {
                tokio::select! {
                    _ = scan_interval.tick() => {
                        if let Err(e) = Self::sweep_at(&store, Utc::now()).await {
                            error!("超时扫描失败: {}", e);
                        }
                    }
                    _ = &mut shutdown_rx => {
                        info!("超时看门狗收到停止请求");
                        break;
                    }
                }
            }
        });

        self.scan_handle = Some(handle);
        info!(
            interval_seconds = scan_interval_seconds,
            "超时看门狗已启动"
        );
        Ok(())
    }

    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(handle) = self.scan_handle.take() {
            let _ = handle.await;
        }
        info!("超时看门狗已停止");
    }

    /// 以给定时刻为"现在"执行一次扫描，返回强制失败的任务数
    pub async fn sweep_at(store: &Arc<dyn JobStore>, now: DateTime<Utc>) -> SentinelResult<u64> {
        let mut failed = 0u64;
        for job in store.started_jobs().await? {
            let Some(deadline) = job.deadline() else {
                continue;
            };
            if now <= deadline {
                continue;
            }
            warn!(
                job_id = %job.id,
                timeout_seconds = job.timeout_seconds,
                worker_id = job.worker_id.as_deref().unwrap_or("-"),
                "任务超过执行期限，强制失败"
            );
            store
                .complete_job(
                    &job.id,
                    JobOutcome::Failure {
                        error: SentinelError::TimeoutExceeded {
                            timeout_seconds: job.timeout_seconds,
                        }
                        .to_string(),
                    },
                )
                .await?;
            metrics::counter!("sentinel_jobs_timed_out_total").increment(1);
            failed += 1;
        }
        Ok(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::models::{Job, JobPriority, JobStatus, JobType, NewJob};
    use sentinel_infrastructure::MemoryJobStore;
    use std::collections::HashMap;

    fn job(timeout_seconds: u64) -> Job {
        Job::new(
            NewJob {
                job_type: JobType::Scan,
                priority: "default".to_string(),
                tenant_id: "tenant-1".to_string(),
                payload: serde_json::json!({}),
                attributes: HashMap::new(),
                timeout_seconds,
                result_ttl_seconds: 600,
            },
            JobPriority::Default,
        )
    }

    #[tokio::test]
    async fn test_overdue_job_is_force_failed() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let j = job(60);
        store.insert_job(&j).await.unwrap();
        store
            .claim_next("w1", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        // 期限内不动
        let failed = TimeoutWatchdog::sweep_at(&store, Utc::now()).await.unwrap();
        assert_eq!(failed, 0);

        // 越过期限后强制失败
        let later = Utc::now() + chrono::Duration::seconds(120);
        let failed = TimeoutWatchdog::sweep_at(&store, later).await.unwrap();
        assert_eq!(failed, 1);

        let stored = store.get_job(&j.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        match stored.outcome.unwrap() {
            JobOutcome::Failure { error } => assert!(error.contains("超时")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sweep_ignores_queued_jobs() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        store.insert_job(&job(1)).await.unwrap();

        let later = Utc::now() + chrono::Duration::seconds(3600);
        let failed = TimeoutWatchdog::sweep_at(&store, later).await.unwrap();
        assert_eq!(failed, 0);
    }

    #[tokio::test]
    async fn test_start_respects_enabled_flag() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let mut watchdog = TimeoutWatchdog::new(
            store,
            WatchdogConfig {
                enabled: false,
                scan_interval_seconds: 1,
            },
        );
        watchdog.start().await.unwrap();
        assert!(watchdog.scan_handle.is_none());
    }
}
