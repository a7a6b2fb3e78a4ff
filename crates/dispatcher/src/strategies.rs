use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use cronflow_core::{
    models::ScheduledTask,
    traits::{LoadBalancingStrategy, StrategyConfiguration},
    SchedulerError, SchedulerResult,
};

pub const MAX_CONNECTIONS_KEY: &str = "max_connections_per_node";
pub const WEIGHT_KEY_PREFIX: &str = "weight.";
pub const SEED_KEY: &str = "seed";

/// 各策略共用的配置：单节点连接上限和节点权重
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategySettings {
    /// 0 表示不限制
    pub max_connections_per_node: u32,
    pub weights: BTreeMap<String, u32>,
}

impl StrategySettings {
    pub fn weight_of(&self, node: &str) -> u32 {
        self.weights.get(node).copied().unwrap_or(1)
    }

    pub fn is_eligible(&self, node: &str, loads: &BTreeMap<String, u32>) -> bool {
        self.max_connections_per_node == 0
            || loads.get(node).copied().unwrap_or(0) < self.max_connections_per_node
    }

    /// 过滤出可用节点，全部饱和时返回 `AllNodesSaturated`
    pub fn eligible_nodes<'a>(
        &self,
        nodes: &'a [String],
        loads: &BTreeMap<String, u32>,
    ) -> SchedulerResult<Vec<&'a String>> {
        if nodes.is_empty() {
            return Err(SchedulerError::NoAvailableNodes);
        }
        let eligible: Vec<&String> = nodes
            .iter()
            .filter(|node| self.is_eligible(node, loads))
            .collect();
        if eligible.is_empty() {
            debug!(
                "所有节点均已达到最大连接数 {}，无法选择",
                self.max_connections_per_node
            );
            return Err(SchedulerError::AllNodesSaturated {
                max_connections: self.max_connections_per_node,
            });
        }
        Ok(eligible)
    }

    pub fn configuration(&self) -> StrategyConfiguration {
        let mut config = StrategyConfiguration::new();
        config.insert(
            MAX_CONNECTIONS_KEY.to_string(),
            self.max_connections_per_node.to_string(),
        );
        for (node, weight) in &self.weights {
            config.insert(format!("{WEIGHT_KEY_PREFIX}{node}"), weight.to_string());
        }
        config
    }

    /// 应用配置，校验全部通过后才修改自身
    pub fn apply(&mut self, config: &StrategyConfiguration) -> SchedulerResult<()> {
        let mut updated = self.clone();
        for (key, value) in config {
            if key == MAX_CONNECTIONS_KEY {
                updated.max_connections_per_node = parse_u32(key, value)?;
            } else if let Some(node) = key.strip_prefix(WEIGHT_KEY_PREFIX) {
                let weight = parse_u32(key, value)?;
                if weight == 0 {
                    return Err(SchedulerError::Configuration(format!(
                        "节点权重必须大于0: {node}"
                    )));
                }
                updated.weights.insert(node.to_string(), weight);
            }
        }
        *self = updated;
        Ok(())
    }

    pub fn from_configuration(config: &StrategyConfiguration) -> SchedulerResult<Self> {
        let mut settings = Self::default();
        settings.apply(config)?;
        Ok(settings)
    }
}

fn parse_u32(key: &str, value: &str) -> SchedulerResult<u32> {
    value.trim().parse::<u32>().map_err(|e| {
        SchedulerError::Configuration(format!("配置项 {key} 的值无效: {value} ({e})"))
    })
}

fn read_settings(settings: &RwLock<StrategySettings>) -> StrategySettings {
    settings.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn update_settings(
    settings: &RwLock<StrategySettings>,
    config: &StrategyConfiguration,
) -> SchedulerResult<()> {
    settings
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .apply(config)
}

/// 最少连接策略：选择在途任务最少的节点
///
/// 候选节点来自注册表的存活快照，已按URL字典序排列，因此负载相同时
/// 总是选中URL最小的节点，与注册先后无关。
#[derive(Debug, Default)]
pub struct LeastConnectionStrategy {
    settings: RwLock<StrategySettings>,
}

impl LeastConnectionStrategy {
    pub fn new(settings: StrategySettings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }
}

impl LoadBalancingStrategy for LeastConnectionStrategy {
    fn name(&self) -> &str {
        "least_connection"
    }

    fn select_node(
        &self,
        nodes: &[String],
        _task: &ScheduledTask,
        loads: &BTreeMap<String, u32>,
    ) -> SchedulerResult<String> {
        let settings = read_settings(&self.settings);
        let eligible = settings.eligible_nodes(nodes, loads)?;
        let selected = eligible
            .into_iter()
            .min_by_key(|node| loads.get(*node).copied().unwrap_or(0))
            .ok_or(SchedulerError::NoAvailableNodes)?;

        debug!(
            "最少连接策略选择节点: {} (负载: {})",
            selected,
            loads.get(selected).copied().unwrap_or(0)
        );
        Ok(selected.clone())
    }

    fn configuration(&self) -> StrategyConfiguration {
        read_settings(&self.settings).configuration()
    }

    fn update_configuration(&self, config: &StrategyConfiguration) -> SchedulerResult<()> {
        update_settings(&self.settings, config)
    }
}

/// 轮询策略
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    counter: AtomicUsize,
    settings: RwLock<StrategySettings>,
}

impl RoundRobinStrategy {
    pub fn new(settings: StrategySettings) -> Self {
        Self {
            counter: AtomicUsize::new(0),
            settings: RwLock::new(settings),
        }
    }
}

impl LoadBalancingStrategy for RoundRobinStrategy {
    fn name(&self) -> &str {
        "round_robin"
    }

    fn select_node(
        &self,
        nodes: &[String],
        _task: &ScheduledTask,
        loads: &BTreeMap<String, u32>,
    ) -> SchedulerResult<String> {
        let settings = read_settings(&self.settings);
        let eligible = settings.eligible_nodes(nodes, loads)?;
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % eligible.len();
        let selected = eligible[index];

        debug!(
            "轮询策略选择节点: {} (索引: {}/{})",
            selected,
            index,
            eligible.len()
        );
        Ok(selected.clone())
    }

    fn configuration(&self) -> StrategyConfiguration {
        read_settings(&self.settings).configuration()
    }

    fn update_configuration(&self, config: &StrategyConfiguration) -> SchedulerResult<()> {
        update_settings(&self.settings, config)
    }
}

/// 加权轮询策略（平滑加权轮询）
///
/// 每次选择时所有可用节点的信用值加上各自权重，选出信用值最大的节点，
/// 再从该节点扣除本轮总权重。一个窗口内各节点被选中的次数与权重成正比。
#[derive(Debug, Default)]
pub struct WeightedRoundRobinStrategy {
    settings: RwLock<StrategySettings>,
    credits: Mutex<BTreeMap<String, i64>>,
}

impl WeightedRoundRobinStrategy {
    pub fn new(settings: StrategySettings) -> Self {
        Self {
            settings: RwLock::new(settings),
            credits: Mutex::new(BTreeMap::new()),
        }
    }
}

impl LoadBalancingStrategy for WeightedRoundRobinStrategy {
    fn name(&self) -> &str {
        "weighted_round_robin"
    }

    fn select_node(
        &self,
        nodes: &[String],
        _task: &ScheduledTask,
        loads: &BTreeMap<String, u32>,
    ) -> SchedulerResult<String> {
        let settings = read_settings(&self.settings);
        let eligible = settings.eligible_nodes(nodes, loads)?;

        let mut credits = self.credits.lock().unwrap_or_else(PoisonError::into_inner);
        credits.retain(|node, _| eligible.iter().any(|e| *e == node));

        let mut total_weight: i64 = 0;
        let mut best: Option<(&String, i64)> = None;
        for node in &eligible {
            let weight = settings.weight_of(node) as i64;
            total_weight += weight;
            let credit = credits.entry((*node).clone()).or_insert(0);
            *credit += weight;
            if best.is_none_or(|(_, best_credit)| *credit > best_credit) {
                best = Some((*node, *credit));
            }
        }

        let (selected, _) = best.ok_or(SchedulerError::NoAvailableNodes)?;
        if let Some(credit) = credits.get_mut(selected) {
            *credit -= total_weight;
        }

        debug!(
            "加权轮询策略选择节点: {} (权重: {})",
            selected,
            settings.weight_of(selected)
        );
        Ok(selected.clone())
    }

    fn configuration(&self) -> StrategyConfiguration {
        read_settings(&self.settings).configuration()
    }

    fn update_configuration(&self, config: &StrategyConfiguration) -> SchedulerResult<()> {
        update_settings(&self.settings, config)?;
        self.credits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}

/// 随机策略，`weighted` 为真时按权重累积区间随机选择
#[derive(Debug)]
pub struct RandomStrategy {
    settings: RwLock<StrategySettings>,
    rng: Mutex<StdRng>,
    weighted: bool,
}

impl RandomStrategy {
    pub fn new(settings: StrategySettings) -> Self {
        Self {
            settings: RwLock::new(settings),
            rng: Mutex::new(StdRng::from_os_rng()),
            weighted: false,
        }
    }

    pub fn weighted(settings: StrategySettings) -> Self {
        Self {
            weighted: true,
            ..Self::new(settings)
        }
    }

    /// 固定随机种子，测试中用于获得可复现的选择序列
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }
}

impl LoadBalancingStrategy for RandomStrategy {
    fn name(&self) -> &str {
        if self.weighted {
            "weighted_random"
        } else {
            "random"
        }
    }

    fn select_node(
        &self,
        nodes: &[String],
        _task: &ScheduledTask,
        loads: &BTreeMap<String, u32>,
    ) -> SchedulerResult<String> {
        let settings = read_settings(&self.settings);
        let eligible = settings.eligible_nodes(nodes, loads)?;
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);

        let selected = if self.weighted {
            let total: u64 = eligible
                .iter()
                .map(|node| settings.weight_of(node) as u64)
                .sum();
            let mut point = rng.random_range(0..total);
            let mut chosen = eligible[eligible.len() - 1];
            for node in &eligible {
                let weight = settings.weight_of(node) as u64;
                if point < weight {
                    chosen = *node;
                    break;
                }
                point -= weight;
            }
            chosen
        } else {
            eligible[rng.random_range(0..eligible.len())]
        };

        debug!("{}策略选择节点: {}", self.name(), selected);
        Ok(selected.clone())
    }

    fn configuration(&self) -> StrategyConfiguration {
        read_settings(&self.settings).configuration()
    }

    fn update_configuration(&self, config: &StrategyConfiguration) -> SchedulerResult<()> {
        let seed = config
            .get(SEED_KEY)
            .map(|seed| {
                seed.trim().parse::<u64>().map_err(|e| {
                    SchedulerError::Configuration(format!(
                        "配置项 {SEED_KEY} 的值无效: {seed} ({e})"
                    ))
                })
            })
            .transpose()?;
        update_settings(&self.settings, config)?;
        if let Some(seed) = seed {
            *self.rng.lock().unwrap_or_else(PoisonError::into_inner) = StdRng::seed_from_u64(seed);
        }
        Ok(())
    }
}

/// 策略工厂：根据配置构造策略实例
pub type StrategyFactory = Arc<
    dyn Fn(&StrategyConfiguration) -> SchedulerResult<Box<dyn LoadBalancingStrategy>> + Send + Sync,
>;

/// 策略注册表
///
/// 名称到工厂函数的显式映射，由调用方在构造负载均衡器时传入。
/// 自定义策略通过 [`StrategyRegistry::register`] 注册。
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    factories: HashMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 包含全部内置策略的注册表
    pub fn with_builtin_strategies() -> Self {
        let mut registry = Self::new();
        registry.register("least_connection", |config| {
            let settings = StrategySettings::from_configuration(config)?;
            Ok(Box::new(LeastConnectionStrategy::new(settings)))
        });
        registry.register("round_robin", |config| {
            let settings = StrategySettings::from_configuration(config)?;
            Ok(Box::new(RoundRobinStrategy::new(settings)))
        });
        registry.register("weighted_round_robin", |config| {
            let settings = StrategySettings::from_configuration(config)?;
            Ok(Box::new(WeightedRoundRobinStrategy::new(settings)))
        });
        registry.register("random", |config| {
            let strategy = RandomStrategy::new(StrategySettings::default());
            strategy.update_configuration(config)?;
            Ok(Box::new(strategy))
        });
        registry.register("weighted_random", |config| {
            let strategy = RandomStrategy::weighted(StrategySettings::default());
            strategy.update_configuration(config)?;
            Ok(Box::new(strategy))
        });
        registry
    }

    /// 注册策略，同名策略被覆盖
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&StrategyConfiguration) -> SchedulerResult<Box<dyn LoadBalancingStrategy>>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn available_strategies(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn create(
        &self,
        name: &str,
        config: &StrategyConfiguration,
    ) -> SchedulerResult<Box<dyn LoadBalancingStrategy>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            SchedulerError::Configuration(format!(
                "未知的负载均衡策略: {name}，可用策略: {:?}",
                self.available_strategies()
            ))
        })?;
        factory(config)
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.available_strategies())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn loads(entries: &[(&str, u32)]) -> BTreeMap<String, u32> {
        entries.iter().map(|(n, l)| (n.to_string(), *l)).collect()
    }

    fn task() -> ScheduledTask {
        ScheduledTask::new("t", "* * * * *")
    }

    #[test]
    fn test_least_connection_picks_minimum_and_breaks_ties_in_order() {
        let strategy = LeastConnectionStrategy::default();
        let nodes = nodes(&["a", "b", "c"]);

        let selected = strategy
            .select_node(&nodes, &task(), &loads(&[("a", 2), ("b", 1), ("c", 1)]))
            .unwrap();
        assert_eq!(selected, "b");

        let selected = strategy
            .select_node(&nodes, &task(), &loads(&[("a", 0), ("b", 0), ("c", 0)]))
            .unwrap();
        assert_eq!(selected, "a");
    }

    #[test]
    fn test_saturation() {
        let strategy = LeastConnectionStrategy::new(StrategySettings {
            max_connections_per_node: 1,
            ..Default::default()
        });
        let nodes = nodes(&["a", "b"]);

        let result = strategy.select_node(&nodes, &task(), &loads(&[("a", 1), ("b", 1)]));
        assert!(matches!(
            result,
            Err(SchedulerError::AllNodesSaturated { max_connections: 1 })
        ));

        let selected = strategy
            .select_node(&nodes, &task(), &loads(&[("a", 1), ("b", 0)]))
            .unwrap();
        assert_eq!(selected, "b");
    }

    #[test]
    fn test_empty_node_list() {
        let strategy = RoundRobinStrategy::default();
        let result = strategy.select_node(&[], &task(), &BTreeMap::new());
        assert!(matches!(result, Err(SchedulerError::NoAvailableNodes)));
    }

    #[test]
    fn test_round_robin_cycles() {
        let strategy = RoundRobinStrategy::default();
        let nodes = nodes(&["a", "b", "c"]);
        let empty = BTreeMap::new();

        let picks: Vec<String> = (0..4)
            .map(|_| strategy.select_node(&nodes, &task(), &empty).unwrap())
            .collect();
        assert_eq!(picks, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_weighted_round_robin_is_proportional() {
        let mut settings = StrategySettings::default();
        settings.weights.insert("a".to_string(), 3);
        settings.weights.insert("b".to_string(), 1);
        let strategy = WeightedRoundRobinStrategy::new(settings);
        let nodes = nodes(&["a", "b"]);
        let empty = BTreeMap::new();

        let picks: Vec<String> = (0..8)
            .map(|_| strategy.select_node(&nodes, &task(), &empty).unwrap())
            .collect();
        assert_eq!(picks.iter().filter(|p| *p == "a").count(), 6);
        assert_eq!(picks.iter().filter(|p| *p == "b").count(), 2);
        // 平滑加权：重节点不会连续独占整个窗口
        assert!(picks[..4].contains(&"b".to_string()));
    }

    #[test]
    fn test_random_is_reproducible_with_seed() {
        let nodes = nodes(&["a", "b", "c"]);
        let empty = BTreeMap::new();
        let first = RandomStrategy::new(StrategySettings::default()).with_seed(7);
        let second = RandomStrategy::new(StrategySettings::default()).with_seed(7);

        for _ in 0..20 {
            let a = first.select_node(&nodes, &task(), &empty).unwrap();
            let b = second.select_node(&nodes, &task(), &empty).unwrap();
            assert_eq!(a, b);
            assert!(nodes.contains(&a));
        }
    }

    #[test]
    fn test_weighted_random_respects_zero_share() {
        let mut settings = StrategySettings::default();
        settings.weights.insert("heavy".to_string(), 1000);
        settings.weights.insert("light".to_string(), 1);
        let strategy = RandomStrategy::weighted(settings).with_seed(42);
        let nodes = nodes(&["heavy", "light"]);
        let empty = BTreeMap::new();

        let heavy_picks = (0..200)
            .filter(|_| strategy.select_node(&nodes, &task(), &empty).unwrap() == "heavy")
            .count();
        assert!(heavy_picks > 180);
    }

    #[test]
    fn test_update_configuration_validates_before_applying() {
        let strategy = LeastConnectionStrategy::default();
        let mut config = StrategyConfiguration::new();
        config.insert(MAX_CONNECTIONS_KEY.to_string(), "5".to_string());
        config.insert("weight.http://w1".to_string(), "2".to_string());
        strategy.update_configuration(&config).unwrap();

        let current = strategy.configuration();
        assert_eq!(current.get(MAX_CONNECTIONS_KEY).map(String::as_str), Some("5"));
        assert_eq!(current.get("weight.http://w1").map(String::as_str), Some("2"));

        let mut bad = StrategyConfiguration::new();
        bad.insert(MAX_CONNECTIONS_KEY.to_string(), "9".to_string());
        bad.insert("weight.http://w2".to_string(), "zero".to_string());
        assert!(strategy.update_configuration(&bad).is_err());
        assert_eq!(
            strategy.configuration().get(MAX_CONNECTIONS_KEY).map(String::as_str),
            Some("5")
        );
    }

    #[test]
    fn test_registry_builtins_and_custom() {
        let mut registry = StrategyRegistry::with_builtin_strategies();
        assert_eq!(
            registry.available_strategies(),
            vec![
                "least_connection",
                "random",
                "round_robin",
                "weighted_random",
                "weighted_round_robin"
            ]
        );

        registry.register("always_first", |config| {
            let settings = StrategySettings::from_configuration(config)?;
            Ok(Box::new(RoundRobinStrategy::new(settings)))
        });
        assert!(registry.contains("always_first"));

        let strategy = registry
            .create("least_connection", &StrategyConfiguration::new())
            .unwrap();
        assert_eq!(strategy.name(), "least_connection");

        assert!(matches!(
            registry.create("nope", &StrategyConfiguration::new()),
            Err(SchedulerError::Configuration(_))
        ));
    }
}
