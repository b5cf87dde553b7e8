//! Sentinel Worker池与任务执行器。

pub mod executors;
pub mod service;

pub use executors::{AnalysisExecutor, ExecutorRegistry, ReportExecutor, ScanExecutor};
pub use service::{WorkerService, WorkerServiceBuilder};
