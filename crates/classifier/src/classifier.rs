use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use sentinel_core::config::ClassifierConfig;
use sentinel_core::errors::SentinelResult;
use sentinel_core::models::{AnalysisReport, Finding};
use sentinel_core::traits::{AnalysisSink, FindingRepository};

/// 异常分类器
///
/// 摄入分析任务的打分观测：低于检出阈值的丢弃，
/// 其余按单调阈值映射出严重级别并落为 active 检出项。
pub struct AnomalyClassifier {
    repository: Arc<dyn FindingRepository>,
    config: ClassifierConfig,
}

impl AnomalyClassifier {
    pub fn new(repository: Arc<dyn FindingRepository>, config: ClassifierConfig) -> Self {
        Self { repository, config }
    }
}

#[async_trait]
impl AnalysisSink for AnomalyClassifier {
    async fn ingest(
        &self,
        tenant_id: &str,
        source_job_id: &str,
        report: &AnalysisReport,
    ) -> SentinelResult<Vec<Finding>> {
        let detection_threshold = self.config.detection_threshold_for(tenant_id);
        let mut findings = Vec::new();
        for observation in &report.observations {
            if observation.score < detection_threshold {
                debug!(
                    label = %observation.label,
                    score = observation.score,
                    "观测低于检出阈值，丢弃"
                );
                continue;
            }
            let severity = self.config.thresholds.severity_for(observation.score);
            let finding = Finding::new(
                tenant_id.to_string(),
                source_job_id.to_string(),
                observation.label.clone(),
                severity,
                observation.score,
            );
            self.repository.insert(&finding).await?;
            metrics::counter!(
                "sentinel_findings_created_total",
                "severity" => severity.as_str()
            )
            .increment(1);
            info!(
                finding_id = %finding.id,
                tenant_id,
                source_job_id,
                severity = severity.as_str(),
                score = observation.score,
                "新检出项"
            );
            findings.push(finding);
        }
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::models::{FindingStatus, Observation, Severity};
    use sentinel_infrastructure::MemoryFindingRepository;

    fn classifier() -> (Arc<MemoryFindingRepository>, AnomalyClassifier) {
        let repo = Arc::new(MemoryFindingRepository::new());
        let classifier = AnomalyClassifier::new(repo.clone(), ClassifierConfig::default());
        (repo, classifier)
    }

    fn report(scores: &[(&str, f64)]) -> AnalysisReport {
        AnalysisReport {
            observations: scores
                .iter()
                .map(|(label, score)| Observation {
                    label: label.to_string(),
                    score: *score,
                    details: serde_json::Value::Null,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_ingest_maps_scores_to_severities() {
        let (_repo, classifier) = classifier();
        let report = report(&[
            ("beacon", 0.85),
            ("dns_tunnel", 0.5),
            ("noise", 0.2),
        ]);

        let findings = classifier.ingest("tenant-1", "job-1", &report).await.unwrap();

        // 0.2 低于检出阈值被丢弃
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].title, "beacon");
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[1].title, "dns_tunnel");
        assert_eq!(findings[1].severity, Severity::Medium);
        assert!(findings.iter().all(|f| f.status == FindingStatus::Active));
    }

    #[tokio::test]
    async fn test_threshold_boundaries() {
        let (_repo, classifier) = classifier();
        let report = report(&[("a", 0.8), ("b", 0.6), ("c", 0.4)]);

        let findings = classifier.ingest("t", "j", &report).await.unwrap();
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[1].severity, Severity::High);
        assert_eq!(findings[2].severity, Severity::Medium);
    }

    #[tokio::test]
    async fn test_findings_are_persisted() {
        let (repo, classifier) = classifier();
        classifier
            .ingest("tenant-1", "job-9", &report(&[("beacon", 0.9)]))
            .await
            .unwrap();

        let stored = repo.list(None).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].source_job_id, "job-9");
        assert_eq!(stored[0].tenant_id, "tenant-1");
    }

    #[tokio::test]
    async fn test_tenant_threshold_override() {
        let repo = Arc::new(MemoryFindingRepository::new());
        let mut config = ClassifierConfig::default();
        config
            .tenant_thresholds
            .insert("strict-tenant".to_string(), 0.7);
        let classifier = AnomalyClassifier::new(repo, config);

        // 0.5 低于该租户的覆盖阈值，被丢弃；其他租户仍按全局阈值
        let findings = classifier
            .ingest("strict-tenant", "job-1", &report(&[("beacon", 0.5)]))
            .await
            .unwrap();
        assert!(findings.is_empty());

        let findings = classifier
            .ingest("tenant-2", "job-2", &report(&[("beacon", 0.5)]))
            .await
            .unwrap();
        assert_eq!(findings.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_report_creates_nothing() {
        let (repo, classifier) = classifier();
        let findings = classifier
            .ingest("tenant-1", "job-1", &AnalysisReport::default())
            .await
            .unwrap();
        assert!(findings.is_empty());
        assert!(repo.list(None).await.unwrap().is_empty());
    }
}
