use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use cronflow_core::{
    config::RetryConfig,
    models::{RetryStrategy, ScheduledTask, TaskExecutionResult},
    traits::WorkerClient,
    MetricsCollector, SchedulerError, SchedulerResult, StructuredLogger,
};

use crate::load_balancer::LoadBalancer;
use crate::node_registry::NodeRegistry;
use crate::task_dispatcher::evict_node;

/// 一次重试调用的结果
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    /// 不满足重试条件，任务未被修改
    Skipped,
    /// 已在新节点上发起远程调用，携带该次调用的执行结果
    Attempted(TaskExecutionResult),
}

impl RetryOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Attempted(result) if result.success)
    }

    pub fn result(&self) -> Option<&TaskExecutionResult> {
        match self {
            Self::Attempted(result) => Some(result),
            Self::Skipped => None,
        }
    }
}

/// 重试服务接口
#[async_trait]
pub trait RetryService: Send + Sync {
    /// 任务当前是否允许重试
    fn should_retry(&self, task: &ScheduledTask) -> bool;

    /// 按任务的重试策略计算下次重试时间
    fn calculate_next_retry_time(&self, task: &ScheduledTask) -> DateTime<Utc>;

    /// 在新节点上重试失败的任务
    ///
    /// 远程调用失败不会作为错误返回，而是体现在 [`RetryOutcome::Attempted`]
    /// 的结果中；只有节点选择失败会以 `SchedulerError::InvalidOperation` 返回。
    async fn retry_task(
        &self,
        task: &mut ScheduledTask,
        failed_node_url: &str,
        error: Option<&SchedulerError>,
    ) -> SchedulerResult<RetryOutcome>;
}

/// 重试管理器
pub struct RetryManager {
    registry: Arc<NodeRegistry>,
    load_balancer: Arc<LoadBalancer>,
    worker_client: Arc<dyn WorkerClient>,
    metrics: Arc<MetricsCollector>,
    retry_config: RetryConfig,
}

impl RetryManager {
    pub fn new(
        registry: Arc<NodeRegistry>,
        load_balancer: Arc<LoadBalancer>,
        worker_client: Arc<dyn WorkerClient>,
        metrics: Arc<MetricsCollector>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            registry,
            load_balancer,
            worker_client,
            metrics,
            retry_config,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.retry_config
    }

    /// 计算重试延迟
    ///
    /// 基础间隔取任务自身的间隔，未设置时取全局默认值。Linear 为 基础×次数，
    /// Exponential 为 基础×2^(次数-1)，结果不超过最大间隔。次数为0时按1计算，
    /// 首次重试的延迟即为基础间隔。
    pub fn calculate_retry_delay(&self, task: &ScheduledTask) -> Duration {
        let base = if task.retry_interval_seconds > 0 {
            task.retry_interval_seconds
        } else {
            self.retry_config.default_interval_seconds
        };
        let attempt = task.current_retry_count.max(1);

        let delay_seconds = match task.retry_strategy {
            RetryStrategy::Fixed => base,
            RetryStrategy::Linear => base.saturating_mul(attempt as u64),
            RetryStrategy::Exponential => {
                let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
                base.saturating_mul(factor)
            }
        };
        let capped = delay_seconds.min(self.retry_config.max_interval_seconds);

        Duration::seconds(i64::try_from(capped).unwrap_or(i64::MAX))
    }

    /// 重试次数耗尽：按配置禁用任务，并设置冷却时间
    fn on_retries_exhausted(&self, task: &mut ScheduledTask) {
        StructuredLogger::log_retry_exhausted(task.id, &task.name, task.max_retry_count);
        if self.retry_config.disable_task_on_exhausted {
            task.enabled = false;
            warn!("任务 {} 重试次数耗尽，已禁用", task.name);
        }
        let cooldown = i64::try_from(self.retry_config.exhausted_cooldown_seconds).unwrap_or(i64::MAX);
        task.next_retry_time = Some(Utc::now() + Duration::seconds(cooldown));
    }
}

#[async_trait]
impl RetryService for RetryManager {
    fn should_retry(&self, task: &ScheduledTask) -> bool {
        if !self.retry_config.enabled {
            debug!("全局重试已关闭，任务 {} 不重试", task.name);
            return false;
        }
        if !task.enable_retry {
            return false;
        }
        if task.current_retry_count >= task.max_retry_count {
            debug!(
                "任务 {} 已达到最大重试次数 {}，不再重试",
                task.name, task.max_retry_count
            );
            return false;
        }
        if task.next_retry_time.is_some_and(|t| t > Utc::now()) {
            debug!("任务 {} 尚未到达重试时间", task.name);
            return false;
        }
        true
    }

    fn calculate_next_retry_time(&self, task: &ScheduledTask) -> DateTime<Utc> {
        Utc::now() + self.calculate_retry_delay(task)
    }

    async fn retry_task(
        &self,
        task: &mut ScheduledTask,
        failed_node_url: &str,
        error: Option<&SchedulerError>,
    ) -> SchedulerResult<RetryOutcome> {
        if task.id.is_nil() {
            return Err(SchedulerError::invalid_argument("任务ID不能为空"));
        }
        if failed_node_url.trim().is_empty() {
            return Err(SchedulerError::invalid_argument("失败节点URL不能为空"));
        }
        if !self.should_retry(task) {
            return Ok(RetryOutcome::Skipped);
        }

        if let Some(error) = error {
            debug!("任务 {} 在节点 {} 上失败: {}", task.name, failed_node_url, error);
        }
        if self.retry_config.skip_failed_nodes {
            evict_node(
                &self.registry,
                &self.load_balancer,
                &self.metrics,
                failed_node_url,
                "重试前剔除失败节点",
            );
        }

        let node_url = self.load_balancer.select_node(task).map_err(|e| {
            if e.is_selection_failure() {
                SchedulerError::InvalidOperation(format!("没有可用于重试任务 {} 的节点: {e}", task.name))
            } else {
                e
            }
        })?;

        self.metrics.record_retry();
        info!(
            "重试任务 {} (第 {} 次)，目标节点: {}",
            task.name,
            task.current_retry_count + 1,
            node_url
        );

        let start_time = Utc::now();
        match self.worker_client.execute(&node_url, task).await {
            Ok(()) => {
                self.load_balancer.decrease_load(&node_url);
                task.current_retry_count = 0;
                task.next_retry_time = None;
                info!("任务 {} 在节点 {} 上重试成功", task.name, node_url);
                Ok(RetryOutcome::Attempted(TaskExecutionResult::completed(
                    task.id, &node_url, start_time,
                )))
            }
            Err(e) => {
                warn!("任务 {} 在节点 {} 上重试失败: {}", task.name, node_url, e);
                if self.retry_config.skip_failed_nodes {
                    evict_node(
                        &self.registry,
                        &self.load_balancer,
                        &self.metrics,
                        &node_url,
                        &e.to_string(),
                    );
                } else {
                    self.load_balancer.decrease_load(&node_url);
                }
                self.metrics.record_task_failure();

                task.current_retry_count += 1;
                task.next_retry_time = Some(self.calculate_next_retry_time(task));
                if task.current_retry_count >= task.max_retry_count {
                    self.on_retries_exhausted(task);
                } else {
                    StructuredLogger::log_retry_scheduled(
                        task.id,
                        &task.name,
                        task.current_retry_count,
                        task.next_retry_time,
                    );
                }
                Ok(RetryOutcome::Attempted(TaskExecutionResult::failed(
                    task.id,
                    &node_url,
                    start_time,
                    e.to_string(),
                    Some(format!("{e:?}")),
                )))
            }
        }
    }
}
