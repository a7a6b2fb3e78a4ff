use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info};

use cronflow_core::{config::RegistryConfig, MetricsCollector, StructuredLogger};

use crate::load_balancer::LoadBalancer;
use crate::node_registry::NodeRegistry;

/// Worker失效检测器
///
/// 周期性地把心跳超时的节点从注册表和负载均衡器中移除。
pub struct WorkerFailureDetector {
    registry: Arc<NodeRegistry>,
    load_balancer: Arc<LoadBalancer>,
    metrics: Arc<MetricsCollector>,
    heartbeat_timeout: chrono::Duration,
    detection_interval: Duration,
}

impl WorkerFailureDetector {
    pub fn new(
        registry: Arc<NodeRegistry>,
        load_balancer: Arc<LoadBalancer>,
        metrics: Arc<MetricsCollector>,
        config: &RegistryConfig,
    ) -> Self {
        Self {
            registry,
            load_balancer,
            metrics,
            heartbeat_timeout: chrono::Duration::seconds(config.heartbeat_timeout_seconds),
            detection_interval: Duration::from_secs(config.detection_interval_seconds),
        }
    }

    /// 执行一次检测，返回被移除的节点
    pub fn detect_failed_nodes(&self) -> Vec<String> {
        let stale = self.registry.remove_stale_nodes(self.heartbeat_timeout);
        for url in &stale {
            let _ = self.load_balancer.remove_node(url);
            StructuredLogger::log_node_evicted(url, "心跳超时");
            self.metrics.record_node_eviction();
        }

        let alive = self.registry.get_alive_nodes(self.heartbeat_timeout).len();
        self.metrics.set_alive_nodes(alive);
        if !stale.is_empty() {
            info!("检测到 {} 个失效节点，当前存活节点 {} 个", stale.len(), alive);
        }
        stale
    }

    /// 运行检测循环，收到关闭信号后退出
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "启动Worker失效检测循环，检测间隔: {:?}，心跳超时: {}秒",
            self.detection_interval,
            self.heartbeat_timeout.num_seconds()
        );
        let mut interval = tokio::time::interval(self.detection_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let removed = self.detect_failed_nodes();
                    debug!("失效检测完成，移除 {} 个节点", removed.len());
                }
                _ = shutdown_rx.recv() => {
                    info!("收到停止信号，退出Worker失效检测循环");
                    break;
                }
            }
        }
    }
}
