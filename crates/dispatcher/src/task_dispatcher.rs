use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error};

use cronflow_core::{
    models::{ScheduledTask, TaskExecutionResult},
    traits::{TaskCompletionListener, WorkerClient},
    MetricsCollector, SchedulerError, SchedulerResult, StructuredLogger,
};

use crate::load_balancer::LoadBalancer;
use crate::node_registry::NodeRegistry;

/// 从注册表和负载均衡器中剔除节点，两边都不存在时什么也不做
pub fn evict_node(
    registry: &NodeRegistry,
    load_balancer: &LoadBalancer,
    metrics: &MetricsCollector,
    node_url: &str,
    reason: &str,
) {
    let from_registry = registry.remove_node(node_url).unwrap_or(false);
    let from_balancer = load_balancer.remove_node(node_url).unwrap_or(false);
    if from_registry || from_balancer {
        StructuredLogger::log_node_evicted(node_url, reason);
        metrics.record_node_eviction();
    } else {
        debug!("节点 {} 已不在注册表中，跳过剔除", node_url);
    }
}

/// 任务分发器
///
/// 通过负载均衡器选择节点并发起远程执行。远程调用失败时节点被视为不健康，
/// 立即从注册表和负载均衡器中剔除，错误继续向上抛出，是否重试由上层决定。
pub struct TaskDispatcher {
    registry: Arc<NodeRegistry>,
    load_balancer: Arc<LoadBalancer>,
    worker_client: Arc<dyn WorkerClient>,
    metrics: Arc<MetricsCollector>,
}

impl TaskDispatcher {
    pub fn new(
        registry: Arc<NodeRegistry>,
        load_balancer: Arc<LoadBalancer>,
        worker_client: Arc<dyn WorkerClient>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            registry,
            load_balancer,
            worker_client,
            metrics,
        }
    }

    /// 分发任务
    ///
    /// 节点选择失败的错误原样返回，此时没有节点被剔除。远程调用结束后
    /// 无论成功失败都会通知 `listener`。
    pub async fn dispatch(
        &self,
        task: &ScheduledTask,
        listener: Option<&dyn TaskCompletionListener>,
    ) -> SchedulerResult<TaskExecutionResult> {
        if task.id.is_nil() {
            return Err(SchedulerError::invalid_argument("任务ID不能为空"));
        }

        let node_url = self.load_balancer.select_node(task)?;
        let start_time = Utc::now();
        StructuredLogger::log_task_dispatched(task.id, &task.name, &node_url);
        self.metrics.record_dispatch();

        let outcome = self.worker_client.execute(&node_url, task).await;

        let (result, error) = match outcome {
            Ok(()) => {
                self.load_balancer.decrease_load(&node_url);
                (
                    TaskExecutionResult::completed(task.id, &node_url, start_time),
                    None,
                )
            }
            Err(e) => {
                error!("任务 {} 在节点 {} 上执行失败: {}", task.name, node_url, e);
                evict_node(
                    &self.registry,
                    &self.load_balancer,
                    &self.metrics,
                    &node_url,
                    &e.to_string(),
                );
                self.metrics.record_task_failure();
                let error = match e {
                    SchedulerError::TransportFailure { .. } => e,
                    other => SchedulerError::transport(&node_url, other.to_string()),
                };
                (
                    TaskExecutionResult::failed(
                        task.id,
                        &node_url,
                        start_time,
                        error.to_string(),
                        Some(format!("{error:?}")),
                    ),
                    Some(error),
                )
            }
        };

        if let Some(duration_ms) = result.duration_ms() {
            self.metrics
                .record_execution_duration(duration_ms as f64 / 1000.0);
        }
        StructuredLogger::log_task_execution_complete(&task.name, &result);

        if let Some(listener) = listener {
            listener.on_task_completed(task, &result).await;
        }

        match error {
            Some(error) => Err(error),
            None => Ok(result),
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn load_balancer(&self) -> &Arc<LoadBalancer> {
        &self.load_balancer
    }
}
