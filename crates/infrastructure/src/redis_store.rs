use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use sentinel_core::errors::{SentinelError, SentinelResult};
use sentinel_core::models::{Job, JobOutcome, JobPriority, JobStatus, QueueStats};
use sentinel_core::traits::{CancelOutcome, JobStore};

/// 空队列时 claim 的轮询间隔
const CLAIM_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 按 high -> default -> low 弹出最早的 queued 任务并原子标记 started。
/// 队列里可能残留已被取消的id，跳过后继续弹出。
/// 任务键在脚本内按弹出的id拼接，没有提前declare在KEYS里，
/// 因此要求所有键落在同一实例：仅支持单实例Redis，不支持cluster。
const CLAIM_SCRIPT: &str = r#"
local tiers = {'high', 'default', 'low'}
for i = 1, 3 do
  local id = redis.call('LPOP', KEYS[i])
  while id do
    local key = ARGV[1] .. ':job:' .. id
    local raw = redis.call('GET', key)
    if raw then
      local job = cjson.decode(raw)
      if job['status'] == 'queued' then
        job['status'] = 'started'
        job['worker_id'] = ARGV[2]
        job['started_at'] = ARGV[3]
        local encoded = cjson.encode(job)
        redis.call('SET', key, encoded)
        redis.call('SADD', KEYS[5], id)
        redis.call('HINCRBY', KEYS[4], tiers[i] .. ':queued', -1)
        redis.call('HINCRBY', KEYS[4], tiers[i] .. ':started', 1)
        return encoded
      end
    end
    id = redis.call('LPOP', KEYS[i])
  end
end
return false
"#;

/// 取消：-1 未找到；0 已终态；1 队列中直接出队；2 执行中已置位
const CANCEL_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return -1 end
local job = cjson.decode(raw)
local s = job['status']
if s == 'finished' or s == 'failed' or s == 'cancelled' then return 0 end
if s == 'queued' then
  local listkey = KEYS[3]
  if job['priority'] == 'high' then listkey = KEYS[2] end
  if job['priority'] == 'low' then listkey = KEYS[4] end
  redis.call('LREM', listkey, 1, ARGV[1])
  job['status'] = 'cancelled'
  job['finished_at'] = ARGV[2]
  job['meta']['cancel_requested'] = true
  redis.call('SET', KEYS[1], cjson.encode(job))
  redis.call('PEXPIRE', KEYS[1], job['result_ttl_seconds'] * 1000)
  redis.call('HINCRBY', KEYS[5], job['priority'] .. ':queued', -1)
  return 1
end
job['meta']['cancel_requested'] = true
redis.call('SET', KEYS[1], cjson.encode(job))
return 2
"#;

/// 写入结果并转入终态，结果只写一次：
/// -2 非 started 不允许写结果；-1 未找到；0 已终态忽略；1 已写入
const COMPLETE_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return -1 end
local job = cjson.decode(raw)
local s = job['status']
if s == 'finished' or s == 'failed' or s == 'cancelled' then return 0 end
if s ~= 'started' then return -2 end
job['outcome'] = cjson.decode(ARGV[2])
job['status'] = ARGV[3]
job['finished_at'] = ARGV[4]
if ARGV[3] == 'finished' then job['progress'] = 100 end
redis.call('SET', KEYS[1], cjson.encode(job))
redis.call('PEXPIRE', KEYS[1], job['result_ttl_seconds'] * 1000)
redis.call('SREM', KEYS[3], ARGV[1])
redis.call('HINCRBY', KEYS[2], job['priority'] .. ':started', -1)
redis.call('HINCRBY', KEYS[2], job['priority'] .. ':' .. ARGV[3], 1)
return 1
"#;

/// queued 的任务同时出队并回退计数，started 的回退 started 计数
const MARK_CANCELLED_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return -1 end
local job = cjson.decode(raw)
local s = job['status']
if s == 'finished' or s == 'failed' or s == 'cancelled' then return 0 end
if s == 'queued' then
  local listkey = KEYS[5]
  if job['priority'] == 'high' then listkey = KEYS[4] end
  if job['priority'] == 'low' then listkey = KEYS[6] end
  redis.call('LREM', listkey, 1, ARGV[1])
  redis.call('HINCRBY', KEYS[2], job['priority'] .. ':queued', -1)
else
  redis.call('HINCRBY', KEYS[2], job['priority'] .. ':started', -1)
end
job['status'] = 'cancelled'
job['finished_at'] = ARGV[2]
redis.call('SET', KEYS[1], cjson.encode(job))
redis.call('PEXPIRE', KEYS[1], job['result_ttl_seconds'] * 1000)
redis.call('SREM', KEYS[3], ARGV[1])
return 1
"#;

/// 进度钳制到 0-100 且单调不减，仅对 started 生效
const PROGRESS_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return -1 end
local job = cjson.decode(raw)
if job['status'] ~= 'started' then return 0 end
local p = tonumber(ARGV[1])
if p > 100 then p = 100 end
if p > job['progress'] then job['progress'] = p end
if ARGV[2] ~= '' then job['meta']['current_phase'] = ARGV[2] end
redis.call('SET', KEYS[1], cjson.encode(job))
return 1
"#;

/// Redis 任务存储
///
/// 任务记录是 JSON 字符串，三个优先级队列是 List，统计是计数 Hash。
/// 所有"读-改-写"都在 Lua 脚本里完成，多实例共享同一个 Redis 时
/// 也不会出现重复领取或结果覆盖。终态记录靠 PEXPIRE 过期。
/// claim 脚本在脚本内动态拼接任务键，仅支持单实例Redis部署，
/// 不支持 Redis Cluster 的键槽分片。
pub struct RedisJobStore {
    conn: ConnectionManager,
    prefix: String,
    claim_script: Script,
    cancel_script: Script,
    complete_script: Script,
    mark_cancelled_script: Script,
    progress_script: Script,
}

impl RedisJobStore {
    pub async fn connect(url: &str, prefix: &str) -> SentinelResult<Self> {
        let client = Client::open(url)
            .map_err(|e| SentinelError::store_error(format!("创建Redis客户端失败: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| SentinelError::store_error(format!("连接Redis失败: {e}")))?;
        info!(url, prefix, "Redis 任务存储已连接");
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
            claim_script: Script::new(CLAIM_SCRIPT),
            cancel_script: Script::new(CANCEL_SCRIPT),
            complete_script: Script::new(COMPLETE_SCRIPT),
            mark_cancelled_script: Script::new(MARK_CANCELLED_SCRIPT),
            progress_script: Script::new(PROGRESS_SCRIPT),
        })
    }

    fn job_key(&self, job_id: &str) -> String {
        format!("{}:job:{}", self.prefix, job_id)
    }

    fn tier_key(&self, priority: JobPriority) -> String {
        format!("{}:q:{}", self.prefix, priority.as_str())
    }

    fn stats_key(&self) -> String {
        format!("{}:stats", self.prefix)
    }

    fn started_key(&self) -> String {
        format!("{}:started", self.prefix)
    }

    async fn fetch_job(&self, job_id: &str) -> SentinelResult<Option<Job>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.job_key(job_id))
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn try_claim(&self, worker_id: &str) -> SentinelResult<Option<Job>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = self
            .claim_script
            .key(self.tier_key(JobPriority::High))
            .key(self.tier_key(JobPriority::Default))
            .key(self.tier_key(JobPriority::Low))
            .key(self.stats_key())
            .key(self.started_key())
            .arg(&self.prefix)
            .arg(worker_id)
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;
        match raw {
            Some(raw) => {
                let job: Job = serde_json::from_str(&raw)?;
                debug!(job_id = %job.id, worker_id, "任务已领取");
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }
}

fn store_err(e: redis::RedisError) -> SentinelError {
    SentinelError::Store(format!("Redis操作失败: {e}"))
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn insert_job(&self, job: &Job) -> SentinelResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(job)?;
        let _: () = redis::pipe()
            .atomic()
            .set(self.job_key(&job.id), payload)
            .ignore()
            .rpush(self.tier_key(job.priority), &job.id)
            .ignore()
            .hincr(
                self.stats_key(),
                format!("{}:queued", job.priority.as_str()),
                1,
            )
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> SentinelResult<Job> {
        self.fetch_job(job_id)
            .await?
            .ok_or_else(|| SentinelError::job_not_found(job_id))
    }

    async fn claim_next(&self, worker_id: &str, wait: Duration) -> SentinelResult<Option<Job>> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(job) = self.try_claim(worker_id).await? {
                return Ok(Some(job));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(CLAIM_POLL_INTERVAL.min(wait)).await;
        }
    }

    async fn update_progress(
        &self,
        job_id: &str,
        progress: u8,
        phase: Option<String>,
    ) -> SentinelResult<()> {
        let mut conn = self.conn.clone();
        let code: i64 = self
            .progress_script
            .key(self.job_key(job_id))
            .arg(progress as i64)
            .arg(phase.unwrap_or_default())
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;
        if code == -1 {
            return Err(SentinelError::job_not_found(job_id));
        }
        Ok(())
    }

    async fn request_cancel(&self, job_id: &str) -> SentinelResult<CancelOutcome> {
        let mut conn = self.conn.clone();
        let code: i64 = self
            .cancel_script
            .key(self.job_key(job_id))
            .key(self.tier_key(JobPriority::High))
            .key(self.tier_key(JobPriority::Default))
            .key(self.tier_key(JobPriority::Low))
            .key(self.stats_key())
            .arg(job_id)
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;
        match code {
            -1 => Err(SentinelError::job_not_found(job_id)),
            0 => Ok(CancelOutcome::AlreadyTerminal),
            1 => {
                info!(job_id, "队列中的任务已直接取消");
                Ok(CancelOutcome::Dequeued)
            }
            _ => {
                info!(job_id, "取消标志已置位，等待Worker检查点");
                Ok(CancelOutcome::Requested)
            }
        }
    }

    async fn cancel_requested(&self, job_id: &str) -> SentinelResult<bool> {
        let job = self.get_job(job_id).await?;
        Ok(job.meta.cancel_requested)
    }

    async fn complete_job(&self, job_id: &str, outcome: JobOutcome) -> SentinelResult<()> {
        let next = if outcome.is_success() {
            JobStatus::Finished
        } else {
            JobStatus::Failed
        };
        let mut conn = self.conn.clone();
        let code: i64 = self
            .complete_script
            .key(self.job_key(job_id))
            .key(self.stats_key())
            .key(self.started_key())
            .arg(job_id)
            .arg(serde_json::to_string(&outcome)?)
            .arg(next.as_str())
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;
        match code {
            -2 => Err(SentinelError::invalid_transition(
                JobStatus::Queued.as_str(),
                next.as_str(),
            )),
            -1 => Err(SentinelError::job_not_found(job_id)),
            0 => {
                warn!(job_id, "任务已处于终态，忽略结果写入");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn mark_cancelled(&self, job_id: &str) -> SentinelResult<()> {
        let mut conn = self.conn.clone();
        let code: i64 = self
            .mark_cancelled_script
            .key(self.job_key(job_id))
            .key(self.stats_key())
            .key(self.started_key())
            .key(self.tier_key(JobPriority::High))
            .key(self.tier_key(JobPriority::Default))
            .key(self.tier_key(JobPriority::Low))
            .arg(job_id)
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;
        if code == -1 {
            return Err(SentinelError::job_not_found(job_id));
        }
        Ok(())
    }

    async fn started_jobs(&self) -> SentinelResult<Vec<Job>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.started_key())
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        let mut jobs = Vec::with_capacity(ids.len());
        for job_id in ids {
            match self.fetch_job(&job_id).await? {
                Some(job) if job.status == JobStatus::Started => jobs.push(job),
                _ => {
                    // 记录已过期或已转终态，清掉陈旧的集合成员
                    let _: i64 = redis::cmd("SREM")
                        .arg(self.started_key())
                        .arg(&job_id)
                        .query_async(&mut conn)
                        .await
                        .map_err(store_err)?;
                }
            }
        }
        Ok(jobs)
    }

    async fn queue_stats(&self) -> SentinelResult<QueueStats> {
        let mut conn = self.conn.clone();
        let raw: std::collections::HashMap<String, i64> = redis::cmd("HGETALL")
            .arg(self.stats_key())
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        let mut stats = QueueStats::default();
        for priority in JobPriority::TIERS {
            let tier = stats.tier_mut(priority);
            let field = |name: &str| {
                raw.get(&format!("{}:{}", priority.as_str(), name))
                    .copied()
                    .unwrap_or(0)
                    .max(0) as u64
            };
            tier.queued = field("queued");
            tier.started = field("started");
            tier.finished = field("finished");
            tier.failed = field("failed");
        }
        Ok(stats)
    }

    async fn purge_expired(&self) -> SentinelResult<u64> {
        // 终态记录由 PEXPIRE 自动过期，这里无需主动清理
        Ok(0)
    }
}
