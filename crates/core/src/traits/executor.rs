use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::SentinelResult;
use crate::models::Job;
use crate::traits::JobStore;

/// 检查点结果：继续执行，或发现取消请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Continue,
    CancelRequested,
}

/// 任务执行输出
///
/// Cancelled 表示执行体在检查点观察到取消标志后主动停止，
/// 由 Worker 转换为 cancelled 终态，不算失败。
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    Completed(serde_json::Value),
    Cancelled,
}

/// 协作式取消的检查点句柄
///
/// 执行体在每个工作阶段之间调用 checkpoint：写入进度、读取取消标志。
/// 取消只在检查点之间生效，interval 即取消请求的最大观察延迟。
#[derive(Clone)]
pub struct CheckpointHandle {
    store: Arc<dyn JobStore>,
    job_id: String,
    interval: Duration,
}

impl CheckpointHandle {
    pub fn new(store: Arc<dyn JobStore>, job_id: String, interval: Duration) -> Self {
        Self {
            store,
            job_id,
            interval,
        }
    }

    /// 写入进度与当前阶段，并轮询取消标志
    pub async fn checkpoint(
        &self,
        progress: u8,
        phase: Option<&str>,
    ) -> SentinelResult<Checkpoint> {
        self.store
            .update_progress(&self.job_id, progress, phase.map(str::to_string))
            .await?;
        if self.store.cancel_requested(&self.job_id).await? {
            Ok(Checkpoint::CancelRequested)
        } else {
            Ok(Checkpoint::Continue)
        }
    }

    /// 相邻检查点之间的目标间隔，执行体据此切分阶段粒度
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// 执行上下文：任务记录快照 + 检查点句柄
pub struct TaskContext {
    pub job: Job,
    pub handle: CheckpointHandle,
}

impl TaskContext {
    pub fn new(job: Job, handle: CheckpointHandle) -> Self {
        Self { job, handle }
    }
}

/// 任务执行器
///
/// 每种任务类型一个实现；执行体对编排层不透明，
/// 只通过 CheckpointHandle 与外界交互。
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    fn name(&self) -> &str;

    /// 执行任务。业务失败返回 Err(TaskFailure)，由 Worker 记入 failed 终态；
    /// 观察到取消返回 Ok(TaskOutput::Cancelled)。
    async fn execute(&self, ctx: &TaskContext) -> SentinelResult<TaskOutput>;
}
