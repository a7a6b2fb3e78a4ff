use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    observability::ObservabilityConfig,
    scheduling::{DispatchConfig, LoadBalancerConfig, RegistryConfig, RetryConfig, SchedulerConfig},
};

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub load_balancer: LoadBalancerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: CRONFLOW_, nested keys joined by `__`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = toml::to_string(&AppConfig::default()).context("序列化默认配置失败")?;
        let mut builder =
            ConfigBuilder::builder().add_source(File::from_str(&defaults, FileFormat::Toml));

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/cronflow.toml", "cronflow.toml", "/etc/cronflow/config.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("CRONFLOW")
                .prefix_separator("_")
                .separator("__")
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

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate().context("调度器配置验证失败")?;
        self.registry.validate().context("节点注册表配置验证失败")?;
        self.load_balancer
            .validate()
            .context("负载均衡配置验证失败")?;
        self.dispatch.validate().context("分发配置验证失败")?;
        self.retry.validate().context("重试配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.registry.heartbeat_timeout_seconds, 30);
        assert_eq!(config.load_balancer.strategy, "least_connection");
    }

    #[test]
    fn test_toml_roundtrip_with_partial_sections() {
        let config = AppConfig::from_toml(
            r#"
            [scheduler]
            enabled = true
            tick_interval_ms = 500
            invalid_cron_backoff_seconds = 60

            [load_balancer]
            strategy = "weighted_round_robin"
            max_connections_per_node = 4

            [load_balancer.options]
            "weight.http://w1:8080" = "3"
            "#,
        )
        .unwrap();

        assert_eq!(config.scheduler.tick_interval_ms, 500);
        assert_eq!(config.load_balancer.max_connections_per_node, 4);
        assert_eq!(config.retry, RetryConfig::default());

        let strategy_config = config.load_balancer.strategy_configuration();
        assert_eq!(strategy_config.get("weight.http://w1:8080").map(String::as_str), Some("3"));
        assert_eq!(strategy_config.get("max_connections_per_node").map(String::as_str), Some("4"));

        let serialized = config.to_toml().unwrap();
        assert!(serialized.contains("weighted_round_robin"));
    }

    #[test]
    fn test_invalid_retry_config_rejected() {
        let result = AppConfig::from_toml(
            r#"
            [retry]
            enabled = true
            default_interval_seconds = 120
            max_interval_seconds = 60
            skip_failed_nodes = true
            disable_task_on_exhausted = false
            exhausted_cooldown_seconds = 10
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[dispatch]\nrequest_timeout_seconds = 5\n\n[observability]\nlog_level = \"debug\"\nlog_format = \"json\"\nmetrics_enabled = false"
        )
        .unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.dispatch.request_timeout_seconds, 5);
        assert_eq!(config.observability.log_format, "json");
        assert_eq!(config.scheduler, SchedulerConfig::default());
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/cronflow.toml")).is_err());
    }
}
