use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use sentinel_core::errors::{SentinelError, SentinelResult};
use sentinel_core::models::{Finding, FindingStatus};
use sentinel_core::traits::FindingRepository;

/// 内存检出项归档，测试与单机部署用
pub struct MemoryFindingRepository {
    findings: RwLock<HashMap<String, Finding>>,
}

impl MemoryFindingRepository {
    pub fn new() -> Self {
        Self {
            findings: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryFindingRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FindingRepository for MemoryFindingRepository {
    async fn insert(&self, finding: &Finding) -> SentinelResult<()> {
        let mut findings = self.findings.write().await;
        findings.insert(finding.id.clone(), finding.clone());
        Ok(())
    }

    async fn get(&self, finding_id: &str) -> SentinelResult<Finding> {
        let findings = self.findings.read().await;
        findings
            .get(finding_id)
            .cloned()
            .ok_or_else(|| SentinelError::finding_not_found(finding_id))
    }

    async fn list(&self, status: Option<FindingStatus>) -> SentinelResult<Vec<Finding>> {
        let findings = self.findings.read().await;
        let mut result: Vec<Finding> = findings
            .values()
            .filter(|f| status.map_or(true, |s| f.status == s))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        Ok(result)
    }

    async fn update_status(
        &self,
        finding_id: &str,
        expected_version: i64,
        next: FindingStatus,
    ) -> SentinelResult<Finding> {
        let mut findings = self.findings.write().await;
        let finding = findings
            .get_mut(finding_id)
            .ok_or_else(|| SentinelError::finding_not_found(finding_id))?;
        if finding.version != expected_version {
            return Err(SentinelError::Conflict(format!(
                "检出项 {finding_id} 版本不匹配: 期望 {expected_version}, 实际 {}",
                finding.version
            )));
        }
        if !finding.status.can_transition_to(next) {
            return Err(SentinelError::invalid_transition(
                finding.status.as_str(),
                next.as_str(),
            ));
        }
        finding.status = next;
        finding.version += 1;
        finding.updated_at = Utc::now();
        if next.is_terminal() {
            finding.resolved_at = Some(finding.updated_at);
        }
        Ok(finding.clone())
    }

    async fn count_by_status(&self) -> SentinelResult<Vec<(FindingStatus, u64)>> {
        let findings = self.findings.read().await;
        let mut counts: HashMap<FindingStatus, u64> = HashMap::new();
        for finding in findings.values() {
            *counts.entry(finding.status).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }
}
