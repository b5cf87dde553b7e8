use thiserror::Error;

/// 编排核心统一错误类型
#[derive(Debug, Error)]
pub enum SentinelError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("任务未找到: {id}")]
    JobNotFound { id: String },

    #[error("检出项未找到: {id}")]
    FindingNotFound { id: String },

    #[error("无效的任务参数: {0}")]
    InvalidJobSpec(String),

    #[error("任务执行失败: {0}")]
    TaskFailure(String),

    #[error("任务执行超时 ({timeout_seconds}s)")]
    TimeoutExceeded { timeout_seconds: u64 },

    #[error("非法状态转换: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("并发修改冲突: {0}")]
    Conflict(String),

    #[error("存储错误: {0}")]
    Store(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type SentinelResult<T> = std::result::Result<T, SentinelError>;

impl SentinelError {
    pub fn job_not_found<S: Into<String>>(id: S) -> Self {
        Self::JobNotFound { id: id.into() }
    }
    pub fn finding_not_found<S: Into<String>>(id: S) -> Self {
        Self::FindingNotFound { id: id.into() }
    }
    pub fn invalid_spec<S: Into<String>>(msg: S) -> Self {
        Self::InvalidJobSpec(msg.into())
    }
    pub fn store_error<S: Into<String>>(msg: S) -> Self {
        Self::Store(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn invalid_transition<A: Into<String>, B: Into<String>>(from: A, to: B) -> Self {
        Self::InvalidTransition {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl From<serde_json::Error> for SentinelError {
    fn from(err: serde_json::Error) -> Self {
        SentinelError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SentinelError {
    fn from(err: anyhow::Error) -> Self {
        SentinelError::Internal(err.to_string())
    }
}
