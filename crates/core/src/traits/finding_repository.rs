use async_trait::async_trait;

use crate::errors::SentinelResult;
use crate::models::{AnalysisReport, Finding, FindingStatus};

/// 检出项归档存储
///
/// update_status 以乐观版本号做并发控制：expected_version 不匹配时
/// 返回 Conflict，调用方重新读取后再试。检出项永不删除。
#[async_trait]
pub trait FindingRepository: Send + Sync {
    async fn insert(&self, finding: &Finding) -> SentinelResult<()>;

    async fn get(&self, finding_id: &str) -> SentinelResult<Finding>;

    /// 按状态过滤列出（None 则全部），按 detected_at 降序
    async fn list(&self, status: Option<FindingStatus>) -> SentinelResult<Vec<Finding>>;

    /// 带版本CAS的状态转换。成功返回更新后的记录（版本已递增）。
    async fn update_status(
        &self,
        finding_id: &str,
        expected_version: i64,
        next: FindingStatus,
    ) -> SentinelResult<Finding>;

    /// 按状态统计数量
    async fn count_by_status(&self) -> SentinelResult<Vec<(FindingStatus, u64)>>;
}

/// 分析结果下游接收方
///
/// Worker 在分析类任务成功后调用，不关心下游如何分类。
/// 分类失败不影响任务本身的终态。
#[async_trait]
pub trait AnalysisSink: Send + Sync {
    async fn ingest(
        &self,
        tenant_id: &str,
        source_job_id: &str,
        report: &AnalysisReport,
    ) -> SentinelResult<Vec<Finding>>;
}
