use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use sentinel_api::{create_routes, AppState};
use sentinel_classifier::{AnomalyClassifier, FindingWorkflow, TriageSweeper};
use sentinel_core::traits::{FindingRepository, JobStore};
use sentinel_core::AppConfig;
use sentinel_infrastructure::{
    MemoryFindingRepository, MemoryJobStore, RedisJobStore, RetentionService,
    SqliteFindingRepository,
};
use sentinel_queue::{QueueManager, TimeoutWatchdog};
use sentinel_worker::WorkerServiceBuilder;

/// 运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 只跑Worker池与后台服务
    Worker,
    /// 只跑HTTP API
    Api,
    /// 单进程全量部署
    All,
}

impl AppMode {
    fn runs_workers(self) -> bool {
        matches!(self, AppMode::Worker | AppMode::All)
    }

    fn runs_api(self) -> bool {
        matches!(self, AppMode::Api | AppMode::All)
    }
}

/// 应用装配
///
/// 按配置选择存储后端，把队列、Worker池、分类器和API接到同一个
/// 注入的存储客户端上，收到关闭信号后按启动的逆序停止各组件。
pub struct Application {
    config: AppConfig,
    mode: AppMode,
}

impl Application {
    pub fn new(config: AppConfig, mode: AppMode) -> Self {
        Self { config, mode }
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        if self.config.observability.metrics_enabled {
            self.install_metrics_exporter()?;
        }

        let store = self.build_job_store().await?;
        let repository = self.build_finding_repository().await?;

        let queue = Arc::new(QueueManager::new(store.clone()));
        let classifier = Arc::new(AnomalyClassifier::new(
            repository.clone(),
            self.config.classifier.clone(),
        ));
        let workflow = Arc::new(FindingWorkflow::new(repository.clone()));

        let worker_service = if self.mode.runs_workers() {
            let service = WorkerServiceBuilder::new(store.clone(), self.config.worker.clone())
                .analysis_sink(classifier.clone())
                .build();
            service.start().await?;
            Some(service)
        } else {
            None
        };

        let mut watchdog = TimeoutWatchdog::new(store.clone(), self.config.watchdog.clone());
        let mut retention = RetentionService::new(store.clone(), self.config.retention.clone());
        let mut triage = TriageSweeper::new(repository.clone(), self.config.triage.clone());
        if self.mode.runs_workers() {
            watchdog.start().await?;
            retention.start().await?;
            triage.start().await?;
        }

        let api_handle = if self.mode.runs_api() && self.config.api.enabled {
            Some(self.spawn_api_server(queue, workflow, shutdown_rx.resubscribe()).await?)
        } else {
            None
        };

        info!("所有组件已启动");
        let _ = shutdown_rx.recv().await;
        info!("应用开始停止各组件");

        if let Some(service) = worker_service {
            service.stop().await;
        }
        triage.stop().await;
        watchdog.stop().await;
        retention.stop().await;
        if let Some(handle) = api_handle {
            if let Err(e) = handle.await {
                error!("等待API服务退出失败: {e}");
            }
        }

        info!("所有组件已停止");
        Ok(())
    }

    fn install_metrics_exporter(&self) -> Result<()> {
        let addr: SocketAddr = self
            .config
            .observability
            .metrics_bind_address
            .parse()
            .context("解析指标监听地址失败")?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("安装Prometheus指标导出器失败")?;
        info!(address = %addr, "指标导出器已启动");
        Ok(())
    }

    async fn build_job_store(&self) -> Result<Arc<dyn JobStore>> {
        let store: Arc<dyn JobStore> = match self.config.store.backend.as_str() {
            "redis" => {
                let store = RedisJobStore::connect(
                    &self.config.store.redis_url,
                    &self.config.store.key_prefix,
                )
                .await
                .context("连接Redis任务存储失败")?;
                info!(
                    key_prefix = %self.config.store.key_prefix,
                    "使用Redis任务存储"
                );
                Arc::new(store)
            }
            _ => {
                info!("使用内存任务存储");
                Arc::new(MemoryJobStore::new())
            }
        };
        Ok(store)
    }

    async fn build_finding_repository(&self) -> Result<Arc<dyn FindingRepository>> {
        let repository: Arc<dyn FindingRepository> =
            match self.config.store.finding_backend.as_str() {
                "sqlite" => {
                    let options = SqliteConnectOptions::from_str(&self.config.store.sqlite_url)
                        .context("解析SQLite连接串失败")?
                        .create_if_missing(true);
                    let pool = SqlitePoolOptions::new()
                        .max_connections(5)
                        .connect_with(options)
                        .await
                        .context("连接SQLite检出项归档失败")?;
                    let repository = SqliteFindingRepository::new(pool);
                    repository.migrate().await.context("初始化检出项表失败")?;
                    info!(url = %self.config.store.sqlite_url, "使用SQLite检出项归档");
                    Arc::new(repository)
                }
                _ => {
                    info!("使用内存检出项归档");
                    Arc::new(MemoryFindingRepository::new())
                }
            };
        Ok(repository)
    }

    async fn spawn_api_server(
        &self,
        queue: Arc<QueueManager>,
        workflow: Arc<FindingWorkflow>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<tokio::task::JoinHandle<()>> {
        let state = AppState { queue, workflow };
        let mut router = create_routes(state)
            .layer(TimeoutLayer::new(Duration::from_secs(
                self.config.api.request_timeout_seconds,
            )))
            .layer(TraceLayer::new_for_http());
        if self.config.api.cors_enabled {
            router = router.layer(CorsLayer::permissive());
        }

        let listener = tokio::net::TcpListener::bind(&self.config.api.bind_address)
            .await
            .context("绑定API监听地址失败")?;
        info!(address = %self.config.api.bind_address, "API服务已启动");

        Ok(tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await;
            if let Err(e) = result {
                error!("API服务异常退出: {e}");
            } else {
                info!("API服务已停止");
            }
        }))
    }
}
