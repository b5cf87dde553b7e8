use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::info;

use sentinel_core::errors::{SentinelError, SentinelResult};
use sentinel_core::models::{Finding, FindingStatus, Severity};
use sentinel_core::traits::FindingRepository;

/// SQLite 检出项归档，嵌入式部署的持久化后端
pub struct SqliteFindingRepository {
    pool: SqlitePool,
}

impl SqliteFindingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 建表，幂等
    pub async fn migrate(&self) -> SentinelResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS findings (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                source_job_id TEXT NOT NULL,
                title TEXT NOT NULL,
                severity TEXT NOT NULL,
                confidence REAL NOT NULL,
                status TEXT NOT NULL,
                detected_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                resolved_at TEXT,
                version INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_findings_status ON findings(status)")
            .execute(&self.pool)
            .await?;
        info!("检出项归档表已就绪");
        Ok(())
    }

    fn row_to_finding(row: &SqliteRow) -> SentinelResult<Finding> {
        Ok(Finding {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            source_job_id: row.try_get("source_job_id")?,
            title: row.try_get("title")?,
            severity: row.try_get::<Severity, _>("severity")?,
            confidence: row.try_get("confidence")?,
            status: row.try_get::<FindingStatus, _>("status")?,
            detected_at: row.try_get::<DateTime<Utc>, _>("detected_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
            resolved_at: row.try_get::<Option<DateTime<Utc>>, _>("resolved_at")?,
            version: row.try_get("version")?,
        })
    }
}

#[async_trait]
impl FindingRepository for SqliteFindingRepository {
    async fn insert(&self, finding: &Finding) -> SentinelResult<()> {
        sqlx::query(
            r#"
            INSERT INTO findings
                (id, tenant_id, source_job_id, title, severity, confidence,
                 status, detected_at, updated_at, resolved_at, version)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&finding.id)
        .bind(&finding.tenant_id)
        .bind(&finding.source_job_id)
        .bind(&finding.title)
        .bind(finding.severity)
        .bind(finding.confidence)
        .bind(finding.status)
        .bind(finding.detected_at)
        .bind(finding.updated_at)
        .bind(finding.resolved_at)
        .bind(finding.version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, finding_id: &str) -> SentinelResult<Finding> {
        let row = sqlx::query("SELECT * FROM findings WHERE id = ?")
            .bind(finding_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| SentinelError::finding_not_found(finding_id))?;
        Self::row_to_finding(&row)
    }

    async fn list(&self, status: Option<FindingStatus>) -> SentinelResult<Vec<Finding>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM findings WHERE status = ? ORDER BY detected_at DESC",
                )
                .bind(status)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM findings ORDER BY detected_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(Self::row_to_finding).collect()
    }

    async fn update_status(
        &self,
        finding_id: &str,
        expected_version: i64,
        next: FindingStatus,
    ) -> SentinelResult<Finding> {
        // 先读当前状态做转换校验，再用版本CAS写入
        let current = self.get(finding_id).await?;
        if !current.status.can_transition_to(next) {
            return Err(SentinelError::invalid_transition(
                current.status.as_str(),
                next.as_str(),
            ));
        }
        let now = Utc::now();
        let resolved_at = if next.is_terminal() { Some(now) } else { None };
        let result = sqlx::query(
            r#"
            UPDATE findings
            SET status = ?, version = version + 1, updated_at = ?, resolved_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(next)
        .bind(now)
        .bind(resolved_at)
        .bind(finding_id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SentinelError::Conflict(format!(
                "检出项 {finding_id} 版本不匹配: 期望 {expected_version}"
            )));
        }
        self.get(finding_id).await
    }

    async fn count_by_status(&self) -> SentinelResult<Vec<(FindingStatus, u64)>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS total FROM findings GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let status: FindingStatus = row.try_get("status")?;
                let total: i64 = row.try_get("total")?;
                Ok((status, total.max(0) as u64))
            })
            .collect()
    }
}
