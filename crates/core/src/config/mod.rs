use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::errors::{SentinelError, SentinelResult};
use crate::models::SeverityThresholds;

/// 任务存储后端
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "memory" 或 "redis"
    pub backend: String,
    pub redis_url: String,
    /// Redis键前缀，多实例共用一个Redis时隔离用
    pub key_prefix: String,
    /// 检出项归档："memory" 或 "sqlite"
    pub finding_backend: String,
    pub sqlite_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "sentinel".to_string(),
            finding_backend: "memory".to_string(),
            sqlite_url: "sqlite:sentinel.db".to_string(),
        }
    }
}

/// Worker池
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub enabled: bool,
    /// 并发Worker数量
    pub concurrency: usize,
    /// 空队列阻塞等待的单次上限
    pub claim_wait_seconds: u64,
    /// 检查点目标间隔，即取消请求的最大观察延迟
    pub checkpoint_interval_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: 4,
            claim_wait_seconds: 5,
            checkpoint_interval_seconds: 2,
        }
    }
}

/// 超时看门狗
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    pub enabled: bool,
    pub scan_interval_seconds: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_seconds: 5,
        }
    }
}

/// 异常分类器
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// 低于该分数的观测不产生检出项
    pub detection_threshold: f64,
    /// 按租户覆盖检出阈值
    #[serde(default)]
    pub tenant_thresholds: HashMap<String, f64>,
    #[serde(default)]
    pub thresholds: SeverityThresholds,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            detection_threshold: 0.4,
            tenant_thresholds: HashMap::new(),
            thresholds: SeverityThresholds::default(),
        }
    }
}

impl ClassifierConfig {
    pub fn detection_threshold_for(&self, tenant_id: &str) -> f64 {
        self.tenant_thresholds
            .get(tenant_id)
            .copied()
            .unwrap_or(self.detection_threshold)
    }
}

/// 检出项自动分诊
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageConfig {
    pub enabled: bool,
    pub scan_interval_seconds: u64,
    /// active 状态闲置超过该时长后自动转入 investigating
    pub idle_after_seconds: u64,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            scan_interval_seconds: 60,
            idle_after_seconds: 3600,
        }
    }
}

/// 终态任务记录的保留清理
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub enabled: bool,
    pub sweep_interval_seconds: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_seconds: 30,
        }
    }
}

/// HTTP API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub cors_enabled: bool,
    pub request_timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8080".to_string(),
            cors_enabled: true,
            request_timeout_seconds: 30,
        }
    }
}

/// 可观测性
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,
    pub metrics_bind_address: String,
    pub log_level: String,
    /// "pretty" 或 "json"
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            metrics_bind_address: "0.0.0.0:9090".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub triage: TriageConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 加载顺序：配置文件（显式路径或默认路径）-> SENTINEL_* 环境变量覆盖
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/sentinel.toml",
                "sentinel.toml",
                "/etc/sentinel/config.toml",
            ];
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        builder = builder
            .set_default("store.backend", "memory")?
            .set_default("store.redis_url", "redis://localhost:6379")?
            .set_default("store.key_prefix", "sentinel")?
            .set_default("store.finding_backend", "memory")?
            .set_default("store.sqlite_url", "sqlite:sentinel.db")?
            .set_default("worker.enabled", true)?
            .set_default("worker.concurrency", 4)?
            .set_default("worker.claim_wait_seconds", 5)?
            .set_default("worker.checkpoint_interval_seconds", 2)?
            .set_default("watchdog.enabled", true)?
            .set_default("watchdog.scan_interval_seconds", 5)?
            .set_default("classifier.detection_threshold", 0.4)?
            .set_default("classifier.thresholds.critical", 0.8)?
            .set_default("classifier.thresholds.high", 0.6)?
            .set_default("classifier.thresholds.medium", 0.4)?
            .set_default("triage.enabled", false)?
            .set_default("triage.scan_interval_seconds", 60)?
            .set_default("triage.idle_after_seconds", 3600)?
            .set_default("retention.enabled", true)?
            .set_default("retention.sweep_interval_seconds", 30)?
            .set_default("api.enabled", true)?
            .set_default("api.bind_address", "0.0.0.0:8080")?
            .set_default("api.cors_enabled", true)?
            .set_default("api.request_timeout_seconds", 30)?
            .set_default("observability.metrics_enabled", true)?
            .set_default("observability.metrics_bind_address", "0.0.0.0:9090")?
            .set_default("observability.log_level", "info")?
            .set_default("observability.log_format", "pretty")?;

        builder = builder.add_source(
            Environment::with_prefix("SENTINEL")
                .separator("_")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> SentinelResult<()> {
        match self.store.backend.as_str() {
            "memory" | "redis" => {}
            other => {
                return Err(SentinelError::config_error(format!(
                    "未知的存储后端: {other}"
                )))
            }
        }
        match self.store.finding_backend.as_str() {
            "memory" | "sqlite" => {}
            other => {
                return Err(SentinelError::config_error(format!(
                    "未知的检出项归档后端: {other}"
                )))
            }
        }
        if self.worker.concurrency == 0 {
            return Err(SentinelError::config_error("worker.concurrency 必须大于0"));
        }
        if self.worker.checkpoint_interval_seconds == 0 {
            return Err(SentinelError::config_error(
                "worker.checkpoint_interval_seconds 必须大于0",
            ));
        }
        if self.watchdog.scan_interval_seconds == 0 {
            return Err(SentinelError::config_error(
                "watchdog.scan_interval_seconds 必须大于0",
            ));
        }
        let t = &self.classifier.thresholds;
        if !(t.medium <= t.high && t.high <= t.critical) {
            return Err(SentinelError::config_error(
                "classifier.thresholds 必须满足 medium <= high <= critical",
            ));
        }
        for v in [t.medium, t.high, t.critical, self.classifier.detection_threshold] {
            if !(0.0..=1.0).contains(&v) {
                return Err(SentinelError::config_error("分类阈值必须在 [0,1] 区间内"));
            }
        }
        for (tenant_id, v) in &self.classifier.tenant_thresholds {
            if !(0.0..=1.0).contains(v) {
                return Err(SentinelError::config_error(format!(
                    "租户 {tenant_id} 的检出阈值必须在 [0,1] 区间内"
                )));
            }
        }
        match self.observability.log_format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(SentinelError::config_error(format!(
                    "未知的日志格式: {other}"
                )))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.backend, "memory");
        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.classifier.thresholds.critical, 0.8);
        assert!(!config.triage.enabled);
    }

    #[test]
    fn test_from_toml_overrides() {
        let toml_str = r#"
[store]
backend = "redis"
redis_url = "redis://cache:6379"
key_prefix = "ops"
finding_backend = "sqlite"
sqlite_url = "sqlite::memory:"

[worker]
enabled = true
concurrency = 8
claim_wait_seconds = 2
checkpoint_interval_seconds = 1

[classifier]
detection_threshold = 0.3

[classifier.thresholds]
critical = 0.9
high = 0.7
medium = 0.5
"#;
        let config = AppConfig::from_toml(toml_str).expect("Failed to parse TOML");
        assert_eq!(config.store.backend, "redis");
        assert_eq!(config.worker.concurrency, 8);
        assert_eq!(config.classifier.thresholds.critical, 0.9);
        // 未出现的节使用默认值
        assert!(config.watchdog.enabled);
        assert_eq!(config.api.bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.worker.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.store.backend = "etcd".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.classifier.thresholds.high = 0.95;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config
            .classifier
            .tenant_thresholds
            .insert("tenant-1".to_string(), 1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tenant_threshold_overrides_from_toml() {
        let toml_str = r#"
[classifier]
detection_threshold = 0.4

[classifier.tenant_thresholds]
"strict-tenant" = 0.7
"#;
        let config = AppConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.classifier.detection_threshold_for("strict-tenant"), 0.7);
        assert_eq!(config.classifier.detection_threshold_for("other"), 0.4);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig::default();
        let s = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&s).unwrap();
        assert_eq!(parsed.worker.concurrency, config.worker.concurrency);
        assert_eq!(parsed.store.backend, config.store.backend);
    }
}
