use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 检出项严重级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    #[serde(rename = "low")]
    Low,
    #[serde(rename = "medium")]
    Medium,
    #[serde(rename = "high")]
    High,
    #[serde(rename = "critical")]
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for Severity {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for Severity {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("Invalid severity: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for Severity {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 分数到严重级别的单调映射阈值
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SeverityThresholds {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            critical: 0.8,
            high: 0.6,
            medium: 0.4,
        }
    }
}

impl SeverityThresholds {
    pub fn severity_for(&self, score: f64) -> Severity {
        if score >= self.critical {
            Severity::Critical
        } else if score >= self.high {
            Severity::High
        } else if score >= self.medium {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

/// 检出项状态机
///
/// 创建即 active；analyst 显式操作驱动转换，终态后不再变化：
/// active -> investigating -> {resolved | false_positive}
/// active -> {resolved | false_positive}
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FindingStatus {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "investigating")]
    Investigating,
    #[serde(rename = "resolved")]
    Resolved,
    #[serde(rename = "false_positive")]
    FalsePositive,
}

impl FindingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingStatus::Active => "active",
            FindingStatus::Investigating => "investigating",
            FindingStatus::Resolved => "resolved",
            FindingStatus::FalsePositive => "false_positive",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FindingStatus::Resolved | FindingStatus::FalsePositive)
    }

    pub fn can_transition_to(&self, next: FindingStatus) -> bool {
        matches!(
            (self, next),
            (FindingStatus::Active, FindingStatus::Investigating)
                | (FindingStatus::Active, FindingStatus::Resolved)
                | (FindingStatus::Active, FindingStatus::FalsePositive)
                | (FindingStatus::Investigating, FindingStatus::Resolved)
                | (FindingStatus::Investigating, FindingStatus::FalsePositive)
        )
    }
}

impl sqlx::Type<sqlx::Sqlite> for FindingStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for FindingStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "active" => Ok(FindingStatus::Active),
            "investigating" => Ok(FindingStatus::Investigating),
            "resolved" => Ok(FindingStatus::Resolved),
            "false_positive" => Ok(FindingStatus::FalsePositive),
            _ => Err(format!("Invalid finding status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for FindingStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 威胁/异常检出项
///
/// source_job_id 是弱引用，仅用于回查，任务记录过期后仍保留。
/// 检出项永不删除，终态保留用于审计。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub tenant_id: String,
    pub source_job_id: String,
    pub title: String,
    pub severity: Severity,
    /// [0, 1]
    pub confidence: f64,
    pub status: FindingStatus,
    pub detected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// 乐观并发版本号，每次状态转换递增
    pub version: i64,
}

impl Finding {
    pub fn new(
        tenant_id: String,
        source_job_id: String,
        title: String,
        severity: Severity,
        confidence: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id,
            source_job_id,
            title,
            severity,
            confidence: confidence.clamp(0.0, 1.0),
            status: FindingStatus::Active,
            detected_at: now,
            updated_at: now,
            resolved_at: None,
            version: 1,
        }
    }
}

/// 分析任务输出的单条打分观测
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub label: String,
    pub score: f64,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// 分析任务的结构化结果载荷
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(default)]
    pub observations: Vec<Observation>,
}

impl AnalysisReport {
    pub fn from_result(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }
}
