use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Duration;
use serde::Serialize;
use tracing::{debug, info};

use cronflow_core::{
    config::{LoadBalancerConfig, RegistryConfig},
    models::ScheduledTask,
    traits::{LoadBalancingStrategy, StrategyConfiguration},
    SchedulerError, SchedulerResult,
};

use crate::node_registry::{NodeRegistry, DEFAULT_HEARTBEAT_TIMEOUT_SECONDS};
use crate::strategies::{LeastConnectionStrategy, StrategyRegistry};

/// 切换策略使用的配置键
pub const STRATEGY_KEY: &str = "strategy";

/// 当前策略的描述信息
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StrategyInfo {
    pub strategy: String,
    pub configuration: StrategyConfiguration,
    pub available_strategies: Vec<String>,
    pub node_loads: BTreeMap<String, u32>,
}

struct BalancerState {
    strategy: Arc<dyn LoadBalancingStrategy>,
    loads: BTreeMap<String, u32>,
}

/// 负载均衡器
///
/// 组合注册表的存活信息与自身维护的在途负载计数，选择节点的具体规则委托给
/// 可插拔的 [`LoadBalancingStrategy`]。负载表与策略由同一把锁保护，
/// 与注册表的锁互相独立。
pub struct LoadBalancer {
    registry: Arc<NodeRegistry>,
    strategies: StrategyRegistry,
    heartbeat_timeout: Duration,
    state: Mutex<BalancerState>,
}

impl LoadBalancer {
    /// 使用最少连接策略创建负载均衡器
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self::with_strategy(registry, Box::new(LeastConnectionStrategy::default()))
    }

    pub fn with_strategy(
        registry: Arc<NodeRegistry>,
        strategy: Box<dyn LoadBalancingStrategy>,
    ) -> Self {
        Self {
            registry,
            strategies: StrategyRegistry::with_builtin_strategies(),
            heartbeat_timeout: Duration::seconds(DEFAULT_HEARTBEAT_TIMEOUT_SECONDS),
            state: Mutex::new(BalancerState {
                strategy: Arc::from(strategy),
                loads: BTreeMap::new(),
            }),
        }
    }

    /// 从策略注册表按名称创建策略
    pub fn from_registry(
        registry: Arc<NodeRegistry>,
        strategies: StrategyRegistry,
        strategy_name: &str,
        config: &StrategyConfiguration,
    ) -> SchedulerResult<Self> {
        let strategy = strategies.create(strategy_name, config)?;
        let mut balancer = Self::with_strategy(registry, strategy);
        balancer.strategies = strategies;
        Ok(balancer)
    }

    pub fn from_config(
        registry: Arc<NodeRegistry>,
        strategies: StrategyRegistry,
        balancer_config: &LoadBalancerConfig,
        registry_config: &RegistryConfig,
    ) -> SchedulerResult<Self> {
        let balancer = Self::from_registry(
            registry,
            strategies,
            &balancer_config.strategy,
            &balancer_config.strategy_configuration(),
        )?;
        Ok(balancer.with_heartbeat_timeout(Duration::seconds(
            registry_config.heartbeat_timeout_seconds,
        )))
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BalancerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 为任务选择节点，成功后该节点负载加一
    ///
    /// 调用方必须在任务结束后调用 [`LoadBalancer::decrease_load`]。
    pub fn select_node(&self, task: &ScheduledTask) -> SchedulerResult<String> {
        // 先取存活快照，避免同时持有注册表和负载均衡器的锁
        let alive = self.registry.get_alive_nodes(self.heartbeat_timeout);

        let mut state = self.lock_state();
        state.loads.retain(|url, _| alive.binary_search(url).is_ok());
        for url in &alive {
            state.loads.entry(url.clone()).or_insert(0);
        }

        if alive.is_empty() {
            debug!("没有存活的Worker节点，任务 {} 无法分配", task.name);
            return Err(SchedulerError::NoAvailableNodes);
        }

        let strategy = Arc::clone(&state.strategy);
        let selected = strategy.select_node(&alive, task, &state.loads)?;
        let load = state.loads.entry(selected.clone()).or_insert(0);
        *load += 1;

        debug!(
            "任务 {} 分配到节点 {} (策略: {}, 当前负载: {})",
            task.name,
            selected,
            strategy.name(),
            load
        );
        Ok(selected)
    }

    /// 节点负载减一，最低为0
    pub fn decrease_load(&self, url: &str) {
        let mut state = self.lock_state();
        if let Some(load) = state.loads.get_mut(url.trim()) {
            *load = load.saturating_sub(1);
            debug!("节点 {} 负载减少为 {}", url, load);
        }
    }

    /// 加入节点，已存在时不做任何修改
    pub fn add_node(&self, url: &str) -> SchedulerResult<()> {
        let url = url.trim();
        if url.is_empty() {
            return Err(SchedulerError::invalid_argument("节点URL不能为空"));
        }
        self.lock_state().loads.entry(url.to_string()).or_insert(0);
        Ok(())
    }

    /// 移除节点，节点不存在时返回 `Ok(false)`
    pub fn remove_node(&self, url: &str) -> SchedulerResult<bool> {
        let url = url.trim();
        if url.is_empty() {
            return Err(SchedulerError::invalid_argument("节点URL不能为空"));
        }
        Ok(self.lock_state().loads.remove(url).is_some())
    }

    pub fn get_node_loads(&self) -> BTreeMap<String, u32> {
        self.lock_state().loads.clone()
    }

    /// 更新策略配置
    ///
    /// 包含 `strategy` 键且与当前策略不同时，通过策略注册表创建新策略替换当前策略，
    /// 当前配置与新配置合并后传给新策略。
    pub fn update_strategy_configuration(
        &self,
        config: &StrategyConfiguration,
    ) -> SchedulerResult<()> {
        let mut state = self.lock_state();
        let current_name = state.strategy.name().to_string();

        match config.get(STRATEGY_KEY) {
            Some(name) if name.trim() != current_name => {
                let mut merged = state.strategy.configuration();
                merged.extend(
                    config
                        .iter()
                        .filter(|(key, _)| key.as_str() != STRATEGY_KEY)
                        .map(|(key, value)| (key.clone(), value.clone())),
                );
                let strategy = self.strategies.create(name.trim(), &merged)?;
                info!("负载均衡策略切换: {} -> {}", current_name, strategy.name());
                state.strategy = Arc::from(strategy);
                Ok(())
            }
            _ => {
                state.strategy.update_configuration(config)?;
                info!("负载均衡策略 {} 配置已更新", current_name);
                Ok(())
            }
        }
    }

    pub fn get_strategy_info(&self) -> StrategyInfo {
        let state = self.lock_state();
        StrategyInfo {
            strategy: state.strategy.name().to_string(),
            configuration: state.strategy.configuration(),
            available_strategies: self.strategies.available_strategies(),
            node_loads: state.loads.clone(),
        }
    }
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("LoadBalancer")
            .field("strategy", &state.strategy.name())
            .field("loads", &state.loads)
            .field("heartbeat_timeout", &self.heartbeat_timeout)
            .finish()
    }
}
