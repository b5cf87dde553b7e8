use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::SentinelResult;
use crate::models::{Job, JobOutcome, QueueStats};

/// 取消请求的结果
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// 任务还在队列中，已直接出队并标记 cancelled，永远不会被执行
    Dequeued,
    /// 任务执行中，取消标志已置位，等待Worker在检查点观察到
    Requested,
    /// 任务已处于终态，取消请求无效果
    AlreadyTerminal,
}

/// 任务存储
///
/// 队列管理器、Worker池、超时看门狗共享的唯一事实来源。
/// 所有实现必须保证 claim_next 的"弹出+标记started"是原子的：
/// 同一个任务绝不会被两个Worker同时取到。
#[async_trait]
pub trait JobStore: Send + Sync {
    /// 写入新任务并加入对应优先级队列
    async fn insert_job(&self, job: &Job) -> SentinelResult<()>;

    /// 按 id 读取任务记录；过期清除后返回 JobNotFound
    async fn get_job(&self, job_id: &str) -> SentinelResult<Job>;

    /// 阻塞式取活：按 high -> default -> low 的严格顺序弹出最早的任务，
    /// 原子地标记为 started 并记录 worker_id。
    /// 队列为空时最多等待 wait，超时返回 Ok(None)。
    async fn claim_next(&self, worker_id: &str, wait: Duration) -> SentinelResult<Option<Job>>;

    /// 更新执行进度（钳制到 0-100，单调不减），仅对 started 状态生效
    async fn update_progress(
        &self,
        job_id: &str,
        progress: u8,
        phase: Option<String>,
    ) -> SentinelResult<()>;

    /// 请求取消
    async fn request_cancel(&self, job_id: &str) -> SentinelResult<CancelOutcome>;

    /// 读取取消标志，Worker 在检查点轮询
    async fn cancel_requested(&self, job_id: &str) -> SentinelResult<bool>;

    /// 写入执行结果并转入终态（finished / failed）。
    /// 结果只写一次：任务已处于终态时静默忽略，不覆盖。
    async fn complete_job(&self, job_id: &str, outcome: JobOutcome) -> SentinelResult<()>;

    /// Worker 观察到取消标志后调用，标记 cancelled 终态
    async fn mark_cancelled(&self, job_id: &str) -> SentinelResult<()>;

    /// 所有 started 状态的任务，超时看门狗扫描用
    async fn started_jobs(&self) -> SentinelResult<Vec<Job>>;

    /// 按优先级聚合的队列统计
    async fn queue_stats(&self) -> SentinelResult<QueueStats>;

    /// 清除结果保留期已过的终态任务记录，返回清除数量
    async fn purge_expired(&self) -> SentinelResult<u64>;
}
