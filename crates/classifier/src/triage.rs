use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::interval;
use tracing::{error, info, warn};

use sentinel_core::config::TriageConfig;
use sentinel_core::errors::{SentinelError, SentinelResult};
use sentinel_core::models::FindingStatus;
use sentinel_core::traits::FindingRepository;

/// 检出项自动分诊
///
/// active 状态闲置超过配置窗口的检出项自动转入 investigating，
/// 避免无人认领的检出项沉底。默认关闭。
pub struct TriageSweeper {
    repository: Arc<dyn FindingRepository>,
    config: TriageConfig,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    sweep_handle: Option<tokio::task::JoinHandle<()>>,
}

impl TriageSweeper {
    pub fn new(repository: Arc<dyn FindingRepository>, config: TriageConfig) -> Self {
        Self {
            repository,
            config,
            shutdown_tx: None,
            sweep_handle: None,
        }
    }

    pub async fn start(&mut self) -> SentinelResult<()> {
        if !self.config.enabled {
            info!("自动分诊未启用");
            return Ok(());
        }

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let repository = self.repository.clone();
        let scan_interval_seconds = self.config.scan_interval_seconds;
        let idle_after_seconds = self.config.idle_after_seconds;

        let handle = tokio::spawn(async move {
            let mut scan_interval = interval(Duration::from_secs(scan_interval_seconds));
            loop {
                tokio::select! {
                    _ = scan_interval.tick() => {
                        if let Err(e) =
                            Self::sweep_at(&repository, Utc::now(), idle_after_seconds).await
                        {
                            error!("自动分诊扫描失败: {}", e);
                        }
                    }
                    _ = &mut shutdown_rx => {
                        info!("自动分诊收到停止请求");
                        break;
                    }
                }
            }
        });

        self.sweep_handle = Some(handle);
        info!(
            interval_seconds = scan_interval_seconds,
            idle_after_seconds, "自动分诊已启动"
        );
        Ok(())
    }

    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(handle) = self.sweep_handle.take() {
            let _ = handle.await;
        }
    }

    /// 以给定时刻为"现在"执行一次扫描，返回转入 investigating 的数量
    pub async fn sweep_at(
        repository: &Arc<dyn FindingRepository>,
        now: DateTime<Utc>,
        idle_after_seconds: u64,
    ) -> SentinelResult<u64> {
        let idle_cutoff = now - chrono::Duration::seconds(idle_after_seconds as i64);
        let mut moved = 0u64;
        for finding in repository.list(Some(FindingStatus::Active)).await? {
            if finding.updated_at > idle_cutoff {
                continue;
            }
            match repository
                .update_status(&finding.id, finding.version, FindingStatus::Investigating)
                .await
            {
                Ok(_) => {
                    info!(finding_id = %finding.id, "闲置检出项自动转入调查");
                    moved += 1;
                }
                // analyst 同时操作了该检出项，让位
                Err(SentinelError::Conflict(_)) => {
                    warn!(finding_id = %finding.id, "自动分诊让位于并发操作");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::models::{Finding, Severity};
    use sentinel_infrastructure::MemoryFindingRepository;

    fn finding() -> Finding {
        Finding::new(
            "tenant-1".to_string(),
            "job-1".to_string(),
            "c2_beacon".to_string(),
            Severity::High,
            0.7,
        )
    }

    #[tokio::test]
    async fn test_idle_active_findings_move_to_investigating() {
        let repo: Arc<dyn FindingRepository> = Arc::new(MemoryFindingRepository::new());
        let f = finding();
        repo.insert(&f).await.unwrap();

        // 未过闲置窗口不动
        let moved = TriageSweeper::sweep_at(&repo, Utc::now(), 3600).await.unwrap();
        assert_eq!(moved, 0);

        // 越过窗口后转入 investigating
        let later = Utc::now() + chrono::Duration::seconds(7200);
        let moved = TriageSweeper::sweep_at(&repo, later, 3600).await.unwrap();
        assert_eq!(moved, 1);
        assert_eq!(
            repo.get(&f.id).await.unwrap().status,
            FindingStatus::Investigating
        );
    }

    #[tokio::test]
    async fn test_terminal_findings_are_ignored() {
        let repo: Arc<dyn FindingRepository> = Arc::new(MemoryFindingRepository::new());
        let f = finding();
        repo.insert(&f).await.unwrap();
        repo.update_status(&f.id, 1, FindingStatus::Resolved)
            .await
            .unwrap();

        let later = Utc::now() + chrono::Duration::seconds(7200);
        let moved = TriageSweeper::sweep_at(&repo, later, 3600).await.unwrap();
        assert_eq!(moved, 0);
    }
}
