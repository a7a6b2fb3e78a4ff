use serde::{Deserialize, Serialize};

use crate::traits::StrategyConfiguration;

/// 调度循环配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// 调度tick间隔（毫秒）
    pub tick_interval_ms: u64,
    /// CRON表达式无法解析时的退避时间（秒）
    pub invalid_cron_backoff_seconds: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_ms: 1000,
            invalid_cron_backoff_seconds: 60,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(anyhow::anyhow!("调度间隔必须大于0"));
        }
        if self.invalid_cron_backoff_seconds <= 0 {
            return Err(anyhow::anyhow!("CRON退避时间必须大于0"));
        }
        Ok(())
    }
}

/// 节点注册表与失效检测配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistryConfig {
    /// 心跳超时时间（秒）
    pub heartbeat_timeout_seconds: i64,
    /// 失效检测间隔（秒）
    pub detection_interval_seconds: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_seconds: 30,
            detection_interval_seconds: 10,
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.heartbeat_timeout_seconds <= 0 {
            return Err(anyhow::anyhow!("心跳超时时间必须大于0"));
        }
        if self.detection_interval_seconds == 0 {
            return Err(anyhow::anyhow!("失效检测间隔必须大于0"));
        }
        Ok(())
    }
}

/// 负载均衡配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadBalancerConfig {
    /// 策略名称，必须已在策略注册表中注册
    pub strategy: String,
    /// 单节点最大在途任务数，0表示不限制
    pub max_connections_per_node: u32,
    /// 传给策略的附加配置，例如 `weight.http://10.0.0.1:8080 = "3"`
    #[serde(default)]
    pub options: StrategyConfiguration,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            strategy: "least_connection".to_string(),
            max_connections_per_node: 10,
            options: StrategyConfiguration::new(),
        }
    }
}

impl LoadBalancerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.strategy.trim().is_empty() {
            return Err(anyhow::anyhow!("负载均衡策略不能为空"));
        }
        if self.max_connections_per_node == 0 {
            return Err(anyhow::anyhow!("单节点最大连接数必须大于0"));
        }
        Ok(())
    }

    /// 合并为完整的策略配置
    pub fn strategy_configuration(&self) -> StrategyConfiguration {
        let mut config = self.options.clone();
        config.insert(
            "max_connections_per_node".to_string(),
            self.max_connections_per_node.to_string(),
        );
        config
    }
}

/// 远程分发配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchConfig {
    /// 远程执行请求超时（秒）
    pub request_timeout_seconds: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 30,
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("请求超时时间必须大于0"));
        }
        Ok(())
    }
}

/// 重试配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// 全局重试开关
    pub enabled: bool,
    /// 任务未设置重试间隔时使用的默认间隔（秒）
    pub default_interval_seconds: u64,
    /// 最大重试间隔（秒）
    pub max_interval_seconds: u64,
    /// 重试前是否剔除失败节点
    pub skip_failed_nodes: bool,
    /// 重试次数耗尽后是否禁用任务
    pub disable_task_on_exhausted: bool,
    /// 重试耗尽后的冷却时间（秒）
    pub exhausted_cooldown_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_interval_seconds: 60,  // 1分钟
            max_interval_seconds: 3600,    // 1小时
            skip_failed_nodes: true,
            disable_task_on_exhausted: false,
            exhausted_cooldown_seconds: 3600,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_interval_seconds == 0 {
            return Err(anyhow::anyhow!("默认重试间隔必须大于0"));
        }
        if self.max_interval_seconds < self.default_interval_seconds {
            return Err(anyhow::anyhow!(
                "最大重试间隔({})不能小于默认重试间隔({})",
                self.max_interval_seconds,
                self.default_interval_seconds
            ));
        }
        Ok(())
    }
}
