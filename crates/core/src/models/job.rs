use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 任务类型
///
/// 封闭枚举，编译期映射到对应的执行器，不做运行时字符串查找。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobType {
    #[serde(rename = "scan")]
    Scan,
    #[serde(rename = "analysis")]
    Analysis,
    #[serde(rename = "report")]
    Report,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Scan => "scan",
            JobType::Analysis => "analysis",
            JobType::Report => "report",
        }
    }
}

/// 优先级层级
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobPriority {
    #[serde(rename = "high")]
    High,
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "low")]
    Low,
}

impl JobPriority {
    /// 严格的取队顺序：high 全部取完才轮到 default，再到 low
    pub const TIERS: [JobPriority; 3] = [JobPriority::High, JobPriority::Default, JobPriority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::High => "high",
            JobPriority::Default => "default",
            JobPriority::Low => "low",
        }
    }

    /// 解析优先级字符串；未知层级回落到 default 并返回 corrected=true
    pub fn parse_lossy(raw: &str) -> (JobPriority, bool) {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => (JobPriority::High, false),
            "default" => (JobPriority::Default, false),
            "low" => (JobPriority::Low, false),
            _ => (JobPriority::Default, true),
        }
    }
}

/// 任务状态
///
/// 只允许前向转换：queued -> started -> {finished|failed|cancelled}，
/// queued 可以直接被取消。终态不再变化。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobStatus {
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "started")]
    Started,
    #[serde(rename = "finished")]
    Finished,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Started => "started",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Started)
                | (JobStatus::Queued, JobStatus::Cancelled)
                | (JobStatus::Started, JobStatus::Finished)
                | (JobStatus::Started, JobStatus::Failed)
                | (JobStatus::Started, JobStatus::Cancelled)
        )
    }
}

/// 任务执行结果，写入一次后不再改变
///
/// 带标签的联合类型，消费方直接模式匹配，不做可选字段探测。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobOutcome {
    Success { result: serde_json::Value },
    Failure { error: String },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success { .. })
    }
}

/// 运行期元数据，由执行中的Worker和取消请求方修改
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobMeta {
    pub current_phase: Option<String>,
    pub cancel_requested: bool,
}

/// 任务记录，Job Store 中的单一事实来源
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    pub priority: JobPriority,
    pub tenant_id: String,
    pub payload: serde_json::Value,
    /// 入队时附加的租户/上下文属性
    pub attributes: HashMap<String, String>,
    pub timeout_seconds: u64,
    pub result_ttl_seconds: u64,
    pub status: JobStatus,
    /// 0-100，status=started 期间单调不减
    pub progress: u8,
    pub meta: JobMeta,
    pub outcome: Option<JobOutcome>,
    pub worker_id: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// 入队请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub job_type: JobType,
    /// 原始优先级字符串，未知层级回落到 default
    pub priority: String,
    pub tenant_id: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    pub timeout_seconds: u64,
    pub result_ttl_seconds: u64,
}

impl Job {
    pub fn new(spec: NewJob, priority: JobPriority) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_type: spec.job_type,
            priority,
            tenant_id: spec.tenant_id,
            payload: spec.payload,
            attributes: spec.attributes,
            timeout_seconds: spec.timeout_seconds,
            result_ttl_seconds: spec.result_ttl_seconds,
            status: JobStatus::Queued,
            progress: 0,
            meta: JobMeta::default(),
            outcome: None,
            worker_id: None,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 超时判定截止点（仅对 started 状态有意义）
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.started_at
            .map(|t| t + chrono::Duration::seconds(self.timeout_seconds as i64))
    }
}

/// 只读的任务快照，status() 查询返回
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub id: String,
    pub job_type: JobType,
    pub priority: JobPriority,
    pub tenant_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub current_phase: Option<String>,
    pub cancel_requested: bool,
    pub attributes: HashMap<String, String>,
    pub outcome: Option<JobOutcome>,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            job_type: job.job_type,
            priority: job.priority,
            tenant_id: job.tenant_id.clone(),
            status: job.status,
            progress: job.progress,
            current_phase: job.meta.current_phase.clone(),
            cancel_requested: job.meta.cancel_requested,
            attributes: job.attributes.clone(),
            outcome: job.outcome.clone(),
            enqueued_at: job.enqueued_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

/// 单个优先级层级的统计
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierStats {
    pub queued: u64,
    pub started: u64,
    pub finished: u64,
    pub failed: u64,
}

/// 按优先级聚合的队列统计，纯观测，不修改任何状态
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    pub high: TierStats,
    pub default: TierStats,
    pub low: TierStats,
}

impl QueueStats {
    pub fn tier(&self, priority: JobPriority) -> &TierStats {
        match priority {
            JobPriority::High => &self.high,
            JobPriority::Default => &self.default,
            JobPriority::Low => &self.low,
        }
    }

    pub fn tier_mut(&mut self, priority: JobPriority) -> &mut TierStats {
        match priority {
            JobPriority::High => &mut self.high,
            JobPriority::Default => &mut self.default,
            JobPriority::Low => &mut self.low,
        }
    }
}
