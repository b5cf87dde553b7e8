use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, error, info};

use sentinel_core::config::RetentionConfig;
use sentinel_core::errors::SentinelResult;
use sentinel_core::traits::JobStore;

/// 终态任务记录的保留清理
///
/// 周期性调用存储的 purge_expired，清掉结果保留期已过的记录。
/// 检出项归档不在清理范围内，检出项永不删除。
pub struct RetentionService {
    store: Arc<dyn JobStore>,
    config: RetentionConfig,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    sweep_handle: Option<tokio::task::JoinHandle<()>>,
}

impl RetentionService {
    pub fn new(store: Arc<dyn JobStore>, config: RetentionConfig) -> Self {
        Self {
            store,
            config,
            shutdown_tx: None,
            sweep_handle: None,
        }
    }

    pub async fn start(&mut self) -> SentinelResult<()> {
        if !self.config.enabled {
            info!("保留清理服务未启用");
            return Ok(());
        }

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let store = self.store.clone();
        let sweep_interval_seconds = self.config.sweep_interval_seconds;

        let handle = tokio::spawn(async move {
            let mut sweep_interval = interval(Duration::from_secs(sweep_interval_seconds));
            loop {
                tokio::select! {
                    _ = sweep_interval.tick() => {
                        match store.purge_expired().await {
                            Ok(0) => {}
                            Ok(purged) => debug!(purged, "保留清理完成"),
                            Err(e) => error!("保留清理失败: {}", e),
                        }
                    }
                    _ = &mut shutdown_rx => {
                        info!("保留清理服务收到停止请求");
                        break;
                    }
                }
            }
        });

        self.sweep_handle = Some(handle);
        info!(
            interval_seconds = sweep_interval_seconds,
            "保留清理服务已启动"
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
        info!("保留清理服务已停止");
    }

    /// 手动触发一次清理，返回清除数量
    pub async fn sweep_once(&self) -> SentinelResult<u64> {
        self.store.purge_expired().await
    }
}
