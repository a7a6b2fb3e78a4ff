use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use cronflow_core::{
    config::SchedulerConfig,
    models::{DagTaskStatus, ScheduledTask, TaskExecutionResult, WorkflowState},
    traits::{TaskCompletionListener, TaskStore},
    MetricsCollector, SchedulerError, SchedulerResult, StructuredLogger,
};

use crate::cron_utils::next_occurrence_with_backoff;
use crate::dag_execution_manager::DagExecutionManager;
use crate::retry_service::{RetryOutcome, RetryService};
use crate::task_dispatcher::TaskDispatcher;

/// 一次调度tick的结果
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// 本次分发的任务
    pub dispatched: Vec<Uuid>,
    /// 分发任务的句柄，调度循环不等待它们
    pub handles: Vec<JoinHandle<()>>,
}

impl TickOutcome {
    /// 等待本次tick分发的任务全部结束
    pub async fn join(self) -> Vec<Uuid> {
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                error!("分发任务异常退出: {}", e);
            }
        }
        self.dispatched
    }
}

/// 任务完成后的处理所需的组件，每个分发任务持有一份
#[derive(Clone)]
struct ExecutionContext {
    store: Arc<dyn TaskStore>,
    dispatcher: Arc<TaskDispatcher>,
    retry_service: Arc<dyn RetryService>,
    dag_manager: Arc<DagExecutionManager>,
    listener: Option<Arc<dyn TaskCompletionListener>>,
}

impl ExecutionContext {
    /// 只回写重试相关字段，其余字段以存储中的最新值为准
    ///
    /// 远程调用期间任务可能已被禁用或改期，不能用分发时的快照整体覆盖。
    async fn persist_retry_state(&self, task: &ScheduledTask) {
        let result: SchedulerResult<()> = async {
            let Some(mut stored) = self.store.get_task(task.id).await? else {
                debug!("任务 {} 已从存储中移除，跳过重试状态回写", task.name);
                return Ok(());
            };
            stored.current_retry_count = task.current_retry_count;
            stored.next_retry_time = task.next_retry_time;
            if !task.enabled {
                stored.enabled = false;
            }
            self.store.update_task(&stored).await
        }
        .await;

        if let Err(e) = result {
            StructuredLogger::log_system_error("scheduler", "persist_retry_state", &e);
        }
    }

    async fn notify(&self, task: &ScheduledTask, result: &TaskExecutionResult) {
        if let Some(listener) = &self.listener {
            listener.on_task_completed(task, result).await;
        }
    }

    async fn complete_dag_task(&self, task: &ScheduledTask, result: &TaskExecutionResult) {
        if !task.is_dag_member() {
            return;
        }
        match self
            .dag_manager
            .complete_task(self.store.as_ref(), task.id, result)
            .await
        {
            Ok(released) => {
                if !released.is_empty() {
                    debug!("任务 {} 完成后释放 {} 个下游任务", task.name, released.len());
                }
            }
            Err(e) => StructuredLogger::log_system_error("scheduler", "complete_dag_task", &e),
        }
    }

    async fn execute(self, mut task: ScheduledTask) {
        let start_time = Utc::now();
        let outcome = self.dispatcher.dispatch(&task, self.listener.as_deref()).await;

        match outcome {
            Ok(result) => {
                if task.current_retry_count > 0 || task.next_retry_time.is_some() {
                    task.current_retry_count = 0;
                    task.next_retry_time = None;
                    self.persist_retry_state(&task).await;
                }
                self.complete_dag_task(&task, &result).await;
            }
            Err(SchedulerError::TransportFailure { node_url, message }) => {
                let error = SchedulerError::transport(&node_url, &message);
                let failed =
                    TaskExecutionResult::failed(task.id, &node_url, start_time, message, None);
                self.handle_failure(task, &node_url, error, failed).await;
            }
            Err(e) if e.is_selection_failure() => {
                warn!("任务 {} 没有可用节点: {}", task.name, e);
                let failed =
                    TaskExecutionResult::failed(task.id, "", start_time, e.to_string(), None);
                if self.retry_service.should_retry(&task) {
                    self.defer_unplaced(task, &failed).await;
                } else {
                    self.complete_dag_task(&task, &failed).await;
                }
            }
            Err(e) => StructuredLogger::log_system_error("scheduler", "dispatch", &e),
        }
    }

    /// 没有节点可承接重试：本次同样计入重试次数，次数耗尽后按最终失败处理
    async fn defer_unplaced(&self, mut task: ScheduledTask, failed: &TaskExecutionResult) {
        task.current_retry_count += 1;
        if task.current_retry_count >= task.max_retry_count {
            StructuredLogger::log_retry_exhausted(task.id, &task.name, task.max_retry_count);
            task.next_retry_time = None;
            self.persist_retry_state(&task).await;
            self.complete_dag_task(&task, failed).await;
        } else {
            task.next_retry_time = Some(self.retry_service.calculate_next_retry_time(&task));
            StructuredLogger::log_retry_scheduled(
                task.id,
                &task.name,
                task.current_retry_count,
                task.next_retry_time,
            );
            self.persist_retry_state(&task).await;
        }
    }

    /// 远程调用失败：交给重试管理器，最终失败时通知DAG执行管理器
    ///
    /// 重试尚未耗尽的DAG任务保持 Running，等待到期后再次分发。
    async fn handle_failure(
        &self,
        mut task: ScheduledTask,
        node_url: &str,
        error: SchedulerError,
        failed: TaskExecutionResult,
    ) {
        if !self.retry_service.should_retry(&task) {
            self.complete_dag_task(&task, &failed).await;
            return;
        }

        match self
            .retry_service
            .retry_task(&mut task, node_url, Some(&error))
            .await
        {
            Ok(RetryOutcome::Attempted(result)) => {
                self.persist_retry_state(&task).await;
                self.notify(&task, &result).await;
                let settled = result.success
                    || !task.enabled
                    || task.current_retry_count >= task.max_retry_count;
                if settled {
                    self.complete_dag_task(&task, &result).await;
                }
            }
            Ok(RetryOutcome::Skipped) => {}
            Err(e) => {
                warn!("任务 {} 重试失败: {}", task.name, e);
                self.defer_unplaced(task, &failed).await;
            }
        }
    }
}

/// 任务调度器
///
/// 固定间隔扫描全部任务，分发到期任务并推进下一次执行时间。每个任务的
/// 远程调用在独立的tokio任务中进行，慢节点不会阻塞整个tick。
pub struct TaskScheduler {
    store: Arc<dyn TaskStore>,
    dispatcher: Arc<TaskDispatcher>,
    retry_service: Arc<dyn RetryService>,
    dag_manager: Arc<DagExecutionManager>,
    metrics: Arc<MetricsCollector>,
    listener: Option<Arc<dyn TaskCompletionListener>>,
    config: SchedulerConfig,
}

impl TaskScheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        dispatcher: Arc<TaskDispatcher>,
        retry_service: Arc<dyn RetryService>,
        dag_manager: Arc<DagExecutionManager>,
        metrics: Arc<MetricsCollector>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            retry_service,
            dag_manager,
            metrics,
            listener: None,
            config,
        }
    }

    /// 设置任务完成监听器，每次远程调用结束都会收到通知
    pub fn with_listener(mut self, listener: Arc<dyn TaskCompletionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn dag_manager(&self) -> &Arc<DagExecutionManager> {
        &self.dag_manager
    }

    fn context(&self) -> ExecutionContext {
        ExecutionContext {
            store: Arc::clone(&self.store),
            dispatcher: Arc::clone(&self.dispatcher),
            retry_service: Arc::clone(&self.retry_service),
            dag_manager: Arc::clone(&self.dag_manager),
            listener: self.listener.clone(),
        }
    }

    fn next_run_time(&self, task: &ScheduledTask, now: DateTime<Utc>) -> DateTime<Utc> {
        next_occurrence_with_backoff(
            &task.cron_expression,
            now,
            chrono::Duration::seconds(self.config.invalid_cron_backoff_seconds),
        )
    }

    /// 判断任务本次tick是否可以分发
    async fn is_dispatchable(
        &self,
        task: &ScheduledTask,
        retry_due: bool,
        all_tasks: &[ScheduledTask],
        workflow_states: &mut HashMap<String, Option<WorkflowState>>,
    ) -> bool {
        let Some(workflow_id) = task.dag_workflow_id.as_deref() else {
            return self.dag_manager.can_execute_task(task, all_tasks);
        };

        let state = match workflow_states.get(workflow_id) {
            Some(state) => *state,
            None => {
                let state = self.dag_manager.workflow_state(workflow_id).await;
                workflow_states.insert(workflow_id.to_string(), state);
                state
            }
        };
        if state != Some(WorkflowState::Running) {
            debug!("任务 {} 所属工作流 {} 未在运行 ({:?})，跳过", task.name, workflow_id, state);
            return false;
        }

        task.dag_status == DagTaskStatus::Ready
            || (retry_due && task.dag_status == DagTaskStatus::Running)
    }

    /// 执行一次调度扫描
    ///
    /// 分发前先把推进后的 `next_run_time` 写回存储，同一任务在一个tick内最多分发一次。
    pub async fn tick(&self) -> SchedulerResult<TickOutcome> {
        let started = Instant::now();
        let now = Utc::now();
        let mut all_tasks = self.store.get_all_tasks().await?;
        let mut workflow_states = HashMap::new();

        let mut due: Vec<(Uuid, bool, bool)> = Vec::new();
        for task in &all_tasks {
            let cron_due = task.is_due(now);
            let retry_due = task.is_retry_due(now);
            if !cron_due && !retry_due {
                continue;
            }
            if self
                .is_dispatchable(task, retry_due, &all_tasks, &mut workflow_states)
                .await
            {
                due.push((task.id, cron_due, retry_due));
            } else {
                debug!("任务 {} 已到期但暂不满足执行条件", task.name);
            }
        }

        let mut outcome = TickOutcome::default();
        for (task_id, cron_due, retry_due) in due {
            if all_tasks
                .iter()
                .any(|t| t.id == task_id && t.dag_status == DagTaskStatus::Ready && t.is_dag_member())
            {
                self.dag_manager.mark_task_running(task_id, &mut all_tasks).await;
            }
            let Some(task) = all_tasks.iter_mut().find(|t| t.id == task_id) else {
                continue;
            };

            if cron_due {
                let next = self.next_run_time(task, now);
                task.next_run_time = Some(next);
                StructuredLogger::log_task_scheduled(task.id, &task.name, next);
            }
            if retry_due {
                task.next_retry_time = None;
            }
            if let Err(e) = self.store.update_task(task).await {
                StructuredLogger::log_system_error("scheduler", "update_task", &e);
                continue;
            }

            let context = self.context();
            let task = task.clone();
            outcome.dispatched.push(task.id);
            outcome
                .handles
                .push(tokio::spawn(async move { context.execute(task).await }));
        }

        self.metrics
            .record_scheduling_duration(started.elapsed().as_secs_f64());
        if !outcome.dispatched.is_empty() {
            info!("本次调度分发了 {} 个任务", outcome.dispatched.len());
        }
        Ok(outcome)
    }

    /// 执行一次调度并等待分发的任务全部结束
    pub async fn run_once(&self) -> SchedulerResult<Vec<Uuid>> {
        Ok(self.tick().await?.join().await)
    }

    /// 运行调度循环，收到关闭信号后退出；已分发的远程调用不会被中断
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        if !self.config.enabled {
            info!("调度器已在配置中关闭");
            return;
        }
        info!("启动调度循环，tick间隔: {}ms", self.config.tick_interval_ms);
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        StructuredLogger::log_system_error("scheduler", "tick", &e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("收到停止信号，退出调度循环");
                    break;
                }
            }
        }
    }
}
