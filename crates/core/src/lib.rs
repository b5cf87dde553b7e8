//! Sentinel 编排核心：领域模型、存储与执行器接口、统一错误、配置。
//!
//! 本 crate 不含任何运行时组件，队列、Worker、分类器、API 各自依赖它。

pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::{SentinelError, SentinelResult};
pub use models::{
    AnalysisReport, Finding, FindingStatus, Job, JobMeta, JobOutcome, JobPriority, JobStatus,
    JobType, JobView, NewJob, Observation, QueueStats, Severity, SeverityThresholds, TierStats,
};
pub use traits::{
    AnalysisSink, CancelOutcome, Checkpoint, CheckpointHandle, FindingRepository, JobStore,
    TaskContext, TaskExecutor, TaskOutput,
};
