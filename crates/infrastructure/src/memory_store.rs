use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use sentinel_core::errors::{SentinelError, SentinelResult};
use sentinel_core::models::{Job, JobOutcome, JobPriority, JobStatus, QueueStats};
use sentinel_core::traits::{CancelOutcome, JobStore};

/// 内存任务存储
///
/// 单进程部署与测试用的后端。全部状态在一把 Mutex 之下，
/// claim 的"弹出+标记started"天然原子。结果过期用 tokio 时钟，
/// 测试可以暂停时间推进。
pub struct MemoryJobStore {
    state: Mutex<State>,
    /// 入队时唤醒阻塞中的 claim_next
    queue_wakeup: Notify,
}

struct State {
    jobs: HashMap<String, Job>,
    /// 三个优先级队列，只存任务id
    tiers: [VecDeque<String>; 3],
    /// 终态任务的过期时刻
    expiries: HashMap<String, Instant>,
    stats: QueueStats,
}

fn tier_index(priority: JobPriority) -> usize {
    match priority {
        JobPriority::High => 0,
        JobPriority::Default => 1,
        JobPriority::Low => 2,
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                jobs: HashMap::new(),
                tiers: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                expiries: HashMap::new(),
                stats: QueueStats::default(),
            }),
            queue_wakeup: Notify::new(),
        }
    }

    async fn try_claim(&self, worker_id: &str) -> Option<Job> {
        let mut state = self.state.lock().await;
        for priority in JobPriority::TIERS {
            let idx = tier_index(priority);
            while let Some(job_id) = state.tiers[idx].pop_front() {
                let Some(job) = state.jobs.get_mut(&job_id) else {
                    continue;
                };
                // 队列里可能残留已被取消的id
                if job.status != JobStatus::Queued {
                    continue;
                }
                job.status = JobStatus::Started;
                job.worker_id = Some(worker_id.to_string());
                job.started_at = Some(Utc::now());
                let claimed = job.clone();
                let tier = state.stats.tier_mut(priority);
                tier.queued = tier.queued.saturating_sub(1);
                tier.started += 1;
                debug!(job_id = %claimed.id, worker_id, priority = priority.as_str(), "任务已领取");
                return Some(claimed);
            }
        }
        None
    }

    /// 终态记录的惰性过期检查，持锁调用
    fn expire_if_due(state: &mut State, job_id: &str) -> bool {
        if let Some(expire_at) = state.expiries.get(job_id) {
            if Instant::now() >= *expire_at {
                state.expiries.remove(job_id);
                state.jobs.remove(job_id);
                return true;
            }
        }
        false
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_job(&self, job: &Job) -> SentinelResult<()> {
        let mut state = self.state.lock().await;
        state.jobs.insert(job.id.clone(), job.clone());
        state.tiers[tier_index(job.priority)].push_back(job.id.clone());
        state.stats.tier_mut(job.priority).queued += 1;
        drop(state);
        self.queue_wakeup.notify_one();
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> SentinelResult<Job> {
        let mut state = self.state.lock().await;
        if Self::expire_if_due(&mut state, job_id) {
            return Err(SentinelError::job_not_found(job_id));
        }
        state
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| SentinelError::job_not_found(job_id))
    }

    async fn claim_next(&self, worker_id: &str, wait: Duration) -> SentinelResult<Option<Job>> {
        let deadline = Instant::now() + wait;
        loop {
            // 先注册唤醒再尝试领取，避免错过入队通知
            let notified = self.queue_wakeup.notified();
            if let Some(job) = self.try_claim(worker_id).await {
                return Ok(Some(job));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn update_progress(
        &self,
        job_id: &str,
        progress: u8,
        phase: Option<String>,
    ) -> SentinelResult<()> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| SentinelError::job_not_found(job_id))?;
        if job.status != JobStatus::Started {
            // 终态/队列中的进度写入静默忽略
            return Ok(());
        }
        job.progress = job.progress.max(progress.min(100));
        if phase.is_some() {
            job.meta.current_phase = phase;
        }
        Ok(())
    }

    async fn request_cancel(&self, job_id: &str) -> SentinelResult<CancelOutcome> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get(job_id)
            .ok_or_else(|| SentinelError::job_not_found(job_id))?;
        let (status, priority, ttl) = (job.status, job.priority, job.result_ttl_seconds);

        match status {
            s if s.is_terminal() => Ok(CancelOutcome::AlreadyTerminal),
            JobStatus::Queued => {
                state.tiers[tier_index(priority)].retain(|id| id != job_id);
                let tier = state.stats.tier_mut(priority);
                tier.queued = tier.queued.saturating_sub(1);
                let expire_at = Instant::now() + Duration::from_secs(ttl);
                state.expiries.insert(job_id.to_string(), expire_at);
                if let Some(job) = state.jobs.get_mut(job_id) {
                    job.status = JobStatus::Cancelled;
                    job.meta.cancel_requested = true;
                    job.finished_at = Some(Utc::now());
                }
                info!(job_id, "队列中的任务已直接取消");
                Ok(CancelOutcome::Dequeued)
            }
            JobStatus::Started => {
                if let Some(job) = state.jobs.get_mut(job_id) {
                    job.meta.cancel_requested = true;
                }
                info!(job_id, "取消标志已置位，等待Worker检查点");
                Ok(CancelOutcome::Requested)
            }
            _ => Ok(CancelOutcome::AlreadyTerminal),
        }
    }

    async fn cancel_requested(&self, job_id: &str) -> SentinelResult<bool> {
        let state = self.state.lock().await;
        state
            .jobs
            .get(job_id)
            .map(|job| job.meta.cancel_requested)
            .ok_or_else(|| SentinelError::job_not_found(job_id))
    }

    async fn complete_job(&self, job_id: &str, outcome: JobOutcome) -> SentinelResult<()> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| SentinelError::job_not_found(job_id))?;
        if job.is_terminal() {
            // 结果只写一次
            warn!(job_id, "任务已处于终态，忽略结果写入");
            return Ok(());
        }
        let next = if outcome.is_success() {
            JobStatus::Finished
        } else {
            JobStatus::Failed
        };
        // 只有 started 的任务才能写结果，queued 不允许跳过 started
        if !job.status.can_transition_to(next) {
            return Err(SentinelError::invalid_transition(
                job.status.as_str(),
                next.as_str(),
            ));
        }
        if outcome.is_success() {
            job.progress = 100;
        }
        job.outcome = Some(outcome);
        job.status = next;
        job.finished_at = Some(Utc::now());
        let priority = job.priority;
        let ttl = job.result_ttl_seconds;
        let tier = state.stats.tier_mut(priority);
        tier.started = tier.started.saturating_sub(1);
        match next {
            JobStatus::Finished => tier.finished += 1,
            JobStatus::Failed => tier.failed += 1,
            _ => {}
        }
        state
            .expiries
            .insert(job_id.to_string(), Instant::now() + Duration::from_secs(ttl));
        Ok(())
    }

    async fn mark_cancelled(&self, job_id: &str) -> SentinelResult<()> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| SentinelError::job_not_found(job_id))?;
        if job.is_terminal() {
            return Ok(());
        }
        let priority = job.priority;
        let ttl = job.result_ttl_seconds;
        let prev = job.status;
        job.status = JobStatus::Cancelled;
        job.finished_at = Some(Utc::now());
        match prev {
            JobStatus::Queued => {
                state.tiers[tier_index(priority)].retain(|id| id != job_id);
                let tier = state.stats.tier_mut(priority);
                tier.queued = tier.queued.saturating_sub(1);
            }
            JobStatus::Started => {
                let tier = state.stats.tier_mut(priority);
                tier.started = tier.started.saturating_sub(1);
            }
            _ => {}
        }
        state
            .expiries
            .insert(job_id.to_string(), Instant::now() + Duration::from_secs(ttl));
        Ok(())
    }

    async fn started_jobs(&self) -> SentinelResult<Vec<Job>> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Started)
            .cloned()
            .collect())
    }

    async fn queue_stats(&self) -> SentinelResult<QueueStats> {
        let state = self.state.lock().await;
        Ok(state.stats.clone())
    }

    async fn purge_expired(&self) -> SentinelResult<u64> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let due: Vec<String> = state
            .expiries
            .iter()
            .filter(|(_, expire_at)| now >= **expire_at)
            .map(|(id, _)| id.clone())
            .collect();
        for job_id in &due {
            state.expiries.remove(job_id);
            state.jobs.remove(job_id);
        }
        if !due.is_empty() {
            debug!(count = due.len(), "已清除过期的任务记录");
        }
        Ok(due.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::models::{JobType, NewJob};
    use std::collections::HashMap;

    fn new_job(priority: JobPriority, ttl: u64) -> Job {
        Job::new(
            NewJob {
                job_type: JobType::Scan,
                priority: priority.as_str().to_string(),
                tenant_id: "tenant-1".to_string(),
                payload: serde_json::json!({}),
                attributes: HashMap::new(),
                timeout_seconds: 60,
                result_ttl_seconds: ttl,
            },
            priority,
        )
    }

    #[tokio::test]
    async fn test_claim_follows_strict_priority_order() {
        let store = MemoryJobStore::new();
        let low = new_job(JobPriority::Low, 600);
        let high = new_job(JobPriority::High, 600);
        let default = new_job(JobPriority::Default, 600);

        // 入队顺序：low, high, default
        store.insert_job(&low).await.unwrap();
        store.insert_job(&high).await.unwrap();
        store.insert_job(&default).await.unwrap();

        let wait = Duration::from_millis(10);
        let first = store.claim_next("w1", wait).await.unwrap().unwrap();
        let second = store.claim_next("w1", wait).await.unwrap().unwrap();
        let third = store.claim_next("w1", wait).await.unwrap().unwrap();

        assert_eq!(first.id, high.id);
        assert_eq!(second.id, default.id);
        assert_eq!(third.id, low.id);
        assert!(store.claim_next("w1", wait).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_marks_started_atomically() {
        let store = MemoryJobStore::new();
        let job = new_job(JobPriority::Default, 600);
        store.insert_job(&job).await.unwrap();

        let claimed = store
            .claim_next("w7", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.status, JobStatus::Started);
        assert_eq!(claimed.worker_id.as_deref(), Some("w7"));

        let stored = store.get_job(&job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Started);
    }

    #[tokio::test]
    async fn test_blocked_claim_wakes_on_insert() {
        let store = std::sync::Arc::new(MemoryJobStore::new());
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.claim_next("w1", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let job = new_job(JobPriority::Low, 600);
        store.insert_job(&job).await.unwrap();

        let claimed = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
    }

    #[tokio::test]
    async fn test_concurrent_workers_claim_each_job_exactly_once() {
        let store = std::sync::Arc::new(MemoryJobStore::new());
        let total = 20;
        for _ in 0..total {
            store
                .insert_job(&new_job(JobPriority::Default, 600))
                .await
                .unwrap();
        }

        let mut claimers = Vec::new();
        for n in 0..4 {
            let store = store.clone();
            claimers.push(tokio::spawn(async move {
                let worker_id = format!("w{n}");
                let mut claimed = Vec::new();
                while let Some(job) = store
                    .claim_next(&worker_id, Duration::from_millis(50))
                    .await
                    .unwrap()
                {
                    claimed.push(job.id);
                }
                claimed
            }));
        }

        let mut all: Vec<String> = Vec::new();
        for claimer in claimers {
            all.extend(claimer.await.unwrap());
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total);
    }

    #[tokio::test]
    async fn test_cancel_queued_job_never_executes() {
        let store = MemoryJobStore::new();
        let job = new_job(JobPriority::High, 600);
        store.insert_job(&job).await.unwrap();

        let outcome = store.request_cancel(&job.id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Dequeued);

        // 取消后队列为空
        assert!(store
            .claim_next("w1", Duration::from_millis(10))
            .await
            .unwrap()
            .is_none());
        let stored = store.get_job(&job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_started_job_sets_flag() {
        let store = MemoryJobStore::new();
        let job = new_job(JobPriority::Default, 600);
        store.insert_job(&job).await.unwrap();
        store
            .claim_next("w1", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        let outcome = store.request_cancel(&job.id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Requested);
        assert!(store.cancel_requested(&job.id).await.unwrap());

        store.mark_cancelled(&job.id).await.unwrap();
        let stored = store.get_job(&job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
        assert_eq!(
            store.request_cancel(&job.id).await.unwrap(),
            CancelOutcome::AlreadyTerminal
        );
    }

    #[tokio::test]
    async fn test_complete_rejects_queued_job() {
        let store = MemoryJobStore::new();
        let job = new_job(JobPriority::Default, 600);
        store.insert_job(&job).await.unwrap();

        // 不允许跳过 started 直接写结果
        let err = store
            .complete_job(
                &job.id,
                JobOutcome::Success {
                    result: serde_json::json!(null),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SentinelError::InvalidTransition { .. }));

        let stored = store.get_job(&job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
        assert!(stored.outcome.is_none());
        let stats = store.queue_stats().await.unwrap();
        assert_eq!(stats.default.queued, 1);
        assert_eq!(stats.default.finished, 0);
    }

    #[tokio::test]
    async fn test_mark_cancelled_on_queued_job_dequeues() {
        let store = MemoryJobStore::new();
        let job = new_job(JobPriority::High, 600);
        store.insert_job(&job).await.unwrap();

        store.mark_cancelled(&job.id).await.unwrap();
        assert_eq!(
            store.get_job(&job.id).await.unwrap().status,
            JobStatus::Cancelled
        );
        // 队列与计数同步更新
        assert!(store
            .claim_next("w1", Duration::from_millis(10))
            .await
            .unwrap()
            .is_none());
        let stats = store.queue_stats().await.unwrap();
        assert_eq!(stats.high.queued, 0);
    }

    #[tokio::test]
    async fn test_outcome_is_write_once() {
        let store = MemoryJobStore::new();
        let job = new_job(JobPriority::Default, 600);
        store.insert_job(&job).await.unwrap();
        store
            .claim_next("w1", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        store
            .complete_job(
                &job.id,
                JobOutcome::Success {
                    result: serde_json::json!({"hosts": 2}),
                },
            )
            .await
            .unwrap();
        // 第二次写入被忽略
        store
            .complete_job(
                &job.id,
                JobOutcome::Failure {
                    error: "late".to_string(),
                },
            )
            .await
            .unwrap();

        let stored = store.get_job(&job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Finished);
        assert!(stored.outcome.as_ref().unwrap().is_success());
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_clamped() {
        let store = MemoryJobStore::new();
        let job = new_job(JobPriority::Default, 600);
        store.insert_job(&job).await.unwrap();
        store
            .claim_next("w1", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        store
            .update_progress(&job.id, 60, Some("sweep".to_string()))
            .await
            .unwrap();
        // 回退写入不生效
        store.update_progress(&job.id, 30, None).await.unwrap();
        store.update_progress(&job.id, 120, None).await.unwrap();

        let stored = store.get_job(&job.id).await.unwrap();
        assert_eq!(stored.progress, 100);
        assert_eq!(stored.meta.current_phase.as_deref(), Some("sweep"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_records_expire_after_ttl() {
        let store = MemoryJobStore::new();
        let job = new_job(JobPriority::Default, 1);
        store.insert_job(&job).await.unwrap();
        store
            .claim_next("w1", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        store
            .complete_job(
                &job.id,
                JobOutcome::Success {
                    result: serde_json::json!(null),
                },
            )
            .await
            .unwrap();

        // TTL 内仍可查询
        assert!(store.get_job(&job.id).await.is_ok());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(matches!(
            store.get_job(&job.id).await,
            Err(SentinelError::JobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_queue_stats_track_transitions() {
        let store = MemoryJobStore::new();
        let high = new_job(JobPriority::High, 600);
        let low = new_job(JobPriority::Low, 600);
        store.insert_job(&high).await.unwrap();
        store.insert_job(&low).await.unwrap();

        let stats = store.queue_stats().await.unwrap();
        assert_eq!(stats.high.queued, 1);
        assert_eq!(stats.low.queued, 1);

        store
            .claim_next("w1", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        store
            .complete_job(
                &high.id,
                JobOutcome::Failure {
                    error: "boom".to_string(),
                },
            )
            .await
            .unwrap();

        let stats = store.queue_stats().await.unwrap();
        assert_eq!(stats.high.queued, 0);
        assert_eq!(stats.high.started, 0);
        assert_eq!(stats.high.failed, 1);
        assert_eq!(stats.low.queued, 1);
    }
}
