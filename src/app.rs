use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use cronflow_core::{config::AppConfig, models::ScheduledTask, traits::TaskStore, MetricsCollector};
use cronflow_dispatcher::{
    next_occurrence, CronScheduler, DagExecutionManager, HttpWorkerClient, InMemoryTaskStore,
    LoadBalancer, NodeRegistry, RetryManager, StrategyRegistry, TaskDispatcher, TaskScheduler,
    WorkerFailureDetector,
};

/// 主应用程序
///
/// 按依赖顺序组装各组件：注册表 → 负载均衡器 → 分发器 → 重试管理器 →
/// DAG执行管理器 → 调度器，任务保存在内存存储中。
pub struct Application {
    config: AppConfig,
    registry: Arc<NodeRegistry>,
    load_balancer: Arc<LoadBalancer>,
    store: Arc<InMemoryTaskStore>,
    dag_manager: Arc<DagExecutionManager>,
    scheduler: Arc<TaskScheduler>,
    failure_detector: Arc<WorkerFailureDetector>,
}

impl Application {
    pub fn new(config: AppConfig) -> Result<Self> {
        info!("初始化调度系统组件");

        let metrics = Arc::new(MetricsCollector::new());
        let registry = Arc::new(NodeRegistry::new());
        let load_balancer = Arc::new(
            LoadBalancer::from_config(
                Arc::clone(&registry),
                StrategyRegistry::with_builtin_strategies(),
                &config.load_balancer,
                &config.registry,
            )
            .context("创建负载均衡器失败")?,
        );
        let worker_client =
            Arc::new(HttpWorkerClient::from_config(&config.dispatch).context("创建HTTP客户端失败")?);

        let dispatcher = Arc::new(TaskDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&load_balancer),
            worker_client.clone(),
            Arc::clone(&metrics),
        ));
        let retry_manager = Arc::new(RetryManager::new(
            Arc::clone(&registry),
            Arc::clone(&load_balancer),
            worker_client,
            Arc::clone(&metrics),
            config.retry.clone(),
        ));
        let store = Arc::new(InMemoryTaskStore::new());
        let dag_manager = Arc::new(DagExecutionManager::new());

        let scheduler = Arc::new(TaskScheduler::new(
            store.clone(),
            dispatcher,
            retry_manager,
            Arc::clone(&dag_manager),
            Arc::clone(&metrics),
            config.scheduler.clone(),
        ));
        let failure_detector = Arc::new(WorkerFailureDetector::new(
            Arc::clone(&registry),
            Arc::clone(&load_balancer),
            metrics,
            &config.registry,
        ));

        info!(
            "负载均衡策略: {}，心跳超时: {}秒",
            load_balancer.get_strategy_info().strategy,
            config.registry.heartbeat_timeout_seconds
        );

        Ok(Self {
            config,
            registry,
            load_balancer,
            store,
            dag_manager,
            scheduler,
            failure_detector,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<InMemoryTaskStore> {
        &self.store
    }

    pub fn dag_manager(&self) -> &Arc<DagExecutionManager> {
        &self.dag_manager
    }

    /// 注册初始Worker节点
    pub fn register_nodes(&self, urls: &[String]) -> Result<()> {
        for url in urls {
            self.registry
                .register(url)
                .with_context(|| format!("注册节点失败: {url}"))?;
            self.load_balancer
                .add_node(url)
                .with_context(|| format!("注册节点失败: {url}"))?;
        }
        if !urls.is_empty() {
            info!("已注册 {} 个初始Worker节点", urls.len());
        }
        Ok(())
    }

    /// 从JSON文件加载任务定义，并启动其中的全部工作流
    ///
    /// 未设置 `next_run_time` 的启用任务按CRON表达式计算首次执行时间。
    pub async fn load_tasks(&self, path: &Path) -> Result<usize> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("读取任务文件失败: {}", path.display()))?;
        let tasks: Vec<ScheduledTask> = serde_json::from_str(&content)
            .with_context(|| format!("解析任务文件失败: {}", path.display()))?;
        self.add_tasks(tasks).await
    }

    pub async fn add_tasks(&self, mut tasks: Vec<ScheduledTask>) -> Result<usize> {
        let now = Utc::now();
        for task in &mut tasks {
            if let Err(e) = CronScheduler::validate_cron_expression(&task.cron_expression) {
                warn!("任务 {} 的CRON表达式无效，将按退避间隔重试: {}", task.name, e);
            }
            if task.enabled && task.next_run_time.is_none() {
                task.next_run_time = Some(next_occurrence(&task.cron_expression, now));
            }
        }
        self.store.update_tasks(&tasks).await?;

        let workflow_ids: BTreeSet<String> = tasks
            .iter()
            .filter_map(|task| task.dag_workflow_id.clone())
            .collect();
        for workflow_id in workflow_ids {
            let mut all_tasks = self.store.get_all_tasks().await?;
            let started = self.dag_manager.start_workflow(&workflow_id, &mut all_tasks).await;
            if started.is_success {
                self.store.update_tasks(&all_tasks).await?;
            } else {
                warn!(
                    "工作流 {} 启动失败: {}",
                    workflow_id,
                    started.error_message.unwrap_or_default()
                );
            }
        }

        info!("已加载 {} 个任务", tasks.len());
        Ok(tasks.len())
    }

    /// 启动调度循环和失效检测循环，返回它们的句柄
    pub fn spawn(&self, shutdown_rx: broadcast::Receiver<()>) -> Vec<JoinHandle<()>> {
        let scheduler_handle = {
            let scheduler = Arc::clone(&self.scheduler);
            let shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move { scheduler.run(shutdown_rx).await })
        };

        let detector_handle = {
            let detector = Arc::clone(&self.failure_detector);
            tokio::spawn(async move { detector.run(shutdown_rx).await })
        };

        vec![scheduler_handle, detector_handle]
    }
}
