use std::sync::Arc;

use tracing::info;

use sentinel_core::errors::SentinelResult;
use sentinel_core::models::{Finding, FindingStatus};
use sentinel_core::traits::FindingRepository;

/// 检出项处置流程
///
/// analyst 的显式操作入口。调用方带着读到的版本号提交操作，
/// 版本已被他人推进时得到 Conflict，重读后再决定。
pub struct FindingWorkflow {
    repository: Arc<dyn FindingRepository>,
}

impl FindingWorkflow {
    pub fn new(repository: Arc<dyn FindingRepository>) -> Self {
        Self { repository }
    }

    pub async fn get(&self, finding_id: &str) -> SentinelResult<Finding> {
        self.repository.get(finding_id).await
    }

    pub async fn list(&self, status: Option<FindingStatus>) -> SentinelResult<Vec<Finding>> {
        self.repository.list(status).await
    }

    pub async fn counts(&self) -> SentinelResult<Vec<(FindingStatus, u64)>> {
        self.repository.count_by_status().await
    }

    /// active -> investigating
    pub async fn begin_investigation(
        &self,
        finding_id: &str,
        expected_version: i64,
    ) -> SentinelResult<Finding> {
        self.transition(finding_id, expected_version, FindingStatus::Investigating)
            .await
    }

    /// 终态：确认已处置
    pub async fn resolve(
        &self,
        finding_id: &str,
        expected_version: i64,
    ) -> SentinelResult<Finding> {
        self.transition(finding_id, expected_version, FindingStatus::Resolved)
            .await
    }

    /// 终态：判定为误报
    pub async fn mark_false_positive(
        &self,
        finding_id: &str,
        expected_version: i64,
    ) -> SentinelResult<Finding> {
        self.transition(finding_id, expected_version, FindingStatus::FalsePositive)
            .await
    }

    async fn transition(
        &self,
        finding_id: &str,
        expected_version: i64,
        next: FindingStatus,
    ) -> SentinelResult<Finding> {
        let updated = self
            .repository
            .update_status(finding_id, expected_version, next)
            .await?;
        metrics::counter!(
            "sentinel_finding_transitions_total",
            "to" => next.as_str()
        )
        .increment(1);
        info!(
            finding_id,
            to = next.as_str(),
            version = updated.version,
            "检出项状态已转换"
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::errors::SentinelError;
    use sentinel_core::models::Severity;
    use sentinel_infrastructure::MemoryFindingRepository;

    async fn workflow_with_finding() -> (FindingWorkflow, Finding) {
        let repo = Arc::new(MemoryFindingRepository::new());
        let finding = Finding::new(
            "tenant-1".to_string(),
            "job-1".to_string(),
            "c2_beacon".to_string(),
            Severity::High,
            0.7,
        );
        repo.insert(&finding).await.unwrap();
        (FindingWorkflow::new(repo), finding)
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let (workflow, finding) = workflow_with_finding().await;

        let investigating = workflow.begin_investigation(&finding.id, 1).await.unwrap();
        assert_eq!(investigating.status, FindingStatus::Investigating);

        let resolved = workflow
            .resolve(&finding.id, investigating.version)
            .await
            .unwrap();
        assert_eq!(resolved.status, FindingStatus::Resolved);
        assert!(resolved.resolved_at.is_some());
    }

    #[tokio::test]
    async fn test_direct_false_positive_from_active() {
        let (workflow, finding) = workflow_with_finding().await;
        let fp = workflow.mark_false_positive(&finding.id, 1).await.unwrap();
        assert_eq!(fp.status, FindingStatus::FalsePositive);
    }

    #[tokio::test]
    async fn test_terminal_findings_reject_further_actions() {
        let (workflow, finding) = workflow_with_finding().await;
        let resolved = workflow.resolve(&finding.id, 1).await.unwrap();

        let err = workflow
            .begin_investigation(&finding.id, resolved.version)
            .await
            .unwrap_err();
        assert!(matches!(err, SentinelError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_analysts_get_conflict() {
        let (workflow, finding) = workflow_with_finding().await;

        // 两个 analyst 都读到版本1，先到者成功
        workflow.resolve(&finding.id, 1).await.unwrap();
        let err = workflow
            .mark_false_positive(&finding.id, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SentinelError::Conflict(_)));
    }
}
