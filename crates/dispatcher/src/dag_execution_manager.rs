use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use cronflow_core::{
    models::{
        DagTaskStatus, ScheduledTask, TaskExecutionResult, WorkflowExecutionStatus,
        WorkflowStartResult, WorkflowState,
    },
    traits::TaskStore,
    SchedulerError, SchedulerResult, StructuredLogger,
};

use crate::dependency_checker::DagDependencyChecker;

/// 单个工作流的运行时状态
#[derive(Debug, Clone)]
struct WorkflowEntry {
    status: WorkflowExecutionStatus,
    task_statuses: HashMap<Uuid, DagTaskStatus>,
}

impl WorkflowEntry {
    fn set_task_status(&mut self, task: &mut ScheduledTask, status: DagTaskStatus) {
        task.dag_status = status;
        if let Some(mirror) = self.task_statuses.get_mut(&task.id) {
            *mirror = status;
        }
    }

    fn promotion_allowed(&self) -> bool {
        self.status.state == WorkflowState::Running
    }

    /// 根据任务状态镜像重新统计，并推进工作流终态
    fn recount(&mut self) {
        let status = &mut self.status;
        status.total_tasks = self.task_statuses.len();
        status.completed_tasks = 0;
        status.failed_tasks = 0;
        status.running_tasks = 0;
        status.ready_tasks = 0;
        status.waiting_tasks = 0;
        status.skipped_tasks = 0;
        for task_status in self.task_statuses.values() {
            match task_status {
                DagTaskStatus::Completed => status.completed_tasks += 1,
                DagTaskStatus::Failed => status.failed_tasks += 1,
                DagTaskStatus::Running => status.running_tasks += 1,
                DagTaskStatus::Ready => status.ready_tasks += 1,
                DagTaskStatus::Waiting => status.waiting_tasks += 1,
                DagTaskStatus::Skipped => status.skipped_tasks += 1,
            }
        }

        if !matches!(status.state, WorkflowState::Running | WorkflowState::Paused) {
            return;
        }

        let total = status.total_tasks;
        let finished = status.completed_tasks + status.failed_tasks + status.skipped_tasks;
        let next_state = if status.completed_tasks == total {
            Some(WorkflowState::Completed)
        } else if status.failed_tasks == total {
            Some(WorkflowState::Failed)
        } else if finished == total && status.completed_tasks > 0 && status.failed_tasks > 0 {
            Some(WorkflowState::PartiallyFailed)
        } else {
            None
        };

        if let Some(next_state) = next_state {
            StructuredLogger::log_workflow_state_changed(
                &status.workflow_id,
                status.state,
                next_state,
            );
            status.state = next_state;
            status.end_time = Some(Utc::now());
        }
    }

    /// 暂停 → 运行，提升依赖已满足的等待任务并把它们的 `next_run_time` 置为当前时间
    fn resume(&mut self, all_tasks: &mut [ScheduledTask]) -> Vec<Uuid> {
        let workflow_id = self.status.workflow_id.clone();
        StructuredLogger::log_workflow_state_changed(
            &workflow_id,
            WorkflowState::Paused,
            WorkflowState::Running,
        );
        self.status.state = WorkflowState::Running;

        let snapshot: Vec<ScheduledTask> = all_tasks.to_vec();
        let now = Utc::now();
        let mut promoted = Vec::new();
        for task in all_tasks.iter_mut().filter(|t| t.belongs_to(&workflow_id)) {
            if task.dag_status == DagTaskStatus::Waiting
                && DagDependencyChecker::dependencies_satisfied(task, &snapshot)
            {
                self.set_task_status(task, DagTaskStatus::Ready);
                task.next_run_time = Some(now);
                promoted.push(task.id);
            }
        }
        self.recount();
        if !promoted.is_empty() {
            info!("工作流 {} 恢复后提升 {} 个任务", workflow_id, promoted.len());
        }
        promoted
    }

    /// 应用一次任务完成事件，返回新就绪的下游任务
    fn apply_completion(
        &mut self,
        task_index: usize,
        result: &TaskExecutionResult,
        all_tasks: &mut [ScheduledTask],
    ) -> Vec<Uuid> {
        let new_status = if result.success {
            DagTaskStatus::Completed
        } else {
            DagTaskStatus::Failed
        };
        let completed_id = all_tasks[task_index].id;
        self.set_task_status(&mut all_tasks[task_index], new_status);

        let mut released = Vec::new();
        if result.success {
            let downstream_ids: Vec<Uuid> =
                all_tasks[task_index].next_task_ids.iter().copied().collect();
            for downstream_id in downstream_ids {
                let Some(index) = all_tasks.iter().position(|t| t.id == downstream_id) else {
                    warn!("下游任务 {} 不存在，忽略", downstream_id);
                    continue;
                };

                {
                    let downstream = &mut all_tasks[index];
                    downstream.completed_dependencies_count = (downstream
                        .completed_dependencies_count
                        + 1)
                    .min(downstream.total_dependencies_count);
                }

                let executable = all_tasks[index].dag_status == DagTaskStatus::Waiting
                    && DagDependencyChecker::dependencies_satisfied(&all_tasks[index], all_tasks);
                if executable && self.promotion_allowed() {
                    self.set_task_status(&mut all_tasks[index], DagTaskStatus::Ready);
                    released.push(downstream_id);
                }
            }
        }

        self.recount();
        if !released.is_empty() {
            StructuredLogger::log_dag_tasks_released(
                Some(&self.status.workflow_id),
                completed_id,
                &released,
            );
        }
        released
    }
}

/// DAG执行管理器
///
/// 每个工作流一个条目，条目由各自的异步互斥锁保护：同一工作流的完成事件
/// 串行应用，不同工作流之间互不阻塞。外层表只在查找和插入条目时短暂加锁。
#[derive(Debug, Default)]
pub struct DagExecutionManager {
    workflows: RwLock<HashMap<String, Arc<Mutex<WorkflowEntry>>>>,
}

impl DagExecutionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, workflow_id: &str) -> Option<Arc<Mutex<WorkflowEntry>>> {
        self.workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(workflow_id)
            .cloned()
    }

    /// 启动工作流
    ///
    /// 校验失败或工作流正在运行/暂停时返回失败结果，且不修改任何任务。
    pub async fn start_workflow(
        &self,
        workflow_id: &str,
        all_tasks: &mut [ScheduledTask],
    ) -> WorkflowStartResult {
        let members: Vec<ScheduledTask> = all_tasks
            .iter()
            .filter(|task| task.belongs_to(workflow_id))
            .cloned()
            .collect();
        if members.is_empty() {
            return WorkflowStartResult::failure(format!("工作流 {workflow_id} 不包含任何任务"));
        }

        let existing = self.entry(workflow_id);
        let mut existing_guard = match &existing {
            Some(entry) => {
                let guard = entry.lock().await;
                if matches!(
                    guard.status.state,
                    WorkflowState::Running | WorkflowState::Paused
                ) {
                    return WorkflowStartResult::failure(format!(
                        "工作流 {} 正在执行中 (状态: {:?})，不能重复启动",
                        workflow_id, guard.status.state
                    ));
                }
                Some(guard)
            }
            None => None,
        };

        let validation = DagDependencyChecker::validate_workflow(workflow_id, &members);
        if !validation.is_valid {
            warn!(
                "工作流 {} 校验失败: {:?}",
                workflow_id, validation.error_message
            );
            return WorkflowStartResult::failure(
                validation
                    .error_message
                    .unwrap_or_else(|| format!("工作流 {workflow_id} 校验失败")),
            );
        }

        for task in all_tasks.iter_mut().filter(|t| t.belongs_to(workflow_id)) {
            task.dag_status = DagTaskStatus::Waiting;
        }

        let snapshot: Vec<ScheduledTask> = all_tasks.to_vec();
        let mut ready_task_ids = Vec::new();
        let mut task_statuses = HashMap::new();
        for task in all_tasks.iter_mut().filter(|t| t.belongs_to(workflow_id)) {
            task.total_dependencies_count = task.dependencies.len() as u32;
            task.completed_dependencies_count = task
                .dependencies
                .iter()
                .filter(|dep| {
                    snapshot
                        .iter()
                        .any(|t| t.id == **dep && t.dag_status == DagTaskStatus::Completed)
                })
                .count() as u32;

            if DagDependencyChecker::dependencies_satisfied(task, &snapshot) {
                task.dag_status = DagTaskStatus::Ready;
                ready_task_ids.push(task.id);
            }
            task_statuses.insert(task.id, task.dag_status);
        }

        let mut entry = WorkflowEntry {
            status: WorkflowExecutionStatus::new(workflow_id, members.len()),
            task_statuses,
        };
        entry.recount();

        match existing_guard.as_mut() {
            Some(guard) => **guard = entry,
            None => {
                self.workflows
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(workflow_id.to_string(), Arc::new(Mutex::new(entry)));
            }
        }

        StructuredLogger::log_workflow_state_changed(
            workflow_id,
            WorkflowState::NotStarted,
            WorkflowState::Running,
        );
        info!(
            "工作流 {} 已启动: {} 个任务, {} 个入口任务就绪",
            workflow_id,
            members.len(),
            ready_task_ids.len()
        );

        WorkflowStartResult {
            is_success: true,
            ready_task_count: ready_task_ids.len(),
            ready_task_ids,
            error_message: None,
        }
    }

    /// 处理任务完成事件，返回因此变为就绪的下游任务ID
    ///
    /// 工作流暂停或取消时依赖计数照常推进，但不会提升任何任务。
    pub async fn on_task_completed(
        &self,
        task_id: Uuid,
        result: &TaskExecutionResult,
        all_tasks: &mut [ScheduledTask],
    ) -> Vec<Uuid> {
        let Some(task_index) = all_tasks.iter().position(|t| t.id == task_id) else {
            warn!("完成事件对应的任务 {} 不存在", task_id);
            return Vec::new();
        };
        let Some(workflow_id) = all_tasks[task_index].dag_workflow_id.clone() else {
            debug!("任务 {} 不属于任何工作流，忽略完成事件", task_id);
            return Vec::new();
        };
        let Some(entry) = self.entry(&workflow_id) else {
            warn!("工作流 {} 尚未启动，忽略任务 {} 的完成事件", workflow_id, task_id);
            return Vec::new();
        };

        let mut guard = entry.lock().await;
        guard.apply_completion(task_index, result, all_tasks)
    }

    /// 从存储加载、应用完成事件并写回，整个过程持有工作流锁
    ///
    /// 调度器使用该方法处理DAG任务完成，兄弟任务并发完成时不会丢失依赖计数。
    /// 新就绪任务的 `next_run_time` 置为当前时间，下一个tick即被分发。
    pub async fn complete_task(
        &self,
        store: &dyn TaskStore,
        task_id: Uuid,
        result: &TaskExecutionResult,
    ) -> SchedulerResult<Vec<Uuid>> {
        let task = store
            .get_task(task_id)
            .await?
            .ok_or(SchedulerError::TaskNotFound { id: task_id })?;
        let Some(workflow_id) = task.dag_workflow_id.clone() else {
            return Ok(Vec::new());
        };
        let Some(entry) = self.entry(&workflow_id) else {
            warn!("工作流 {} 尚未启动，忽略任务 {} 的完成事件", workflow_id, task_id);
            return Ok(Vec::new());
        };

        let mut guard = entry.lock().await;
        let mut all_tasks = store.get_all_tasks().await?;
        let Some(task_index) = all_tasks.iter().position(|t| t.id == task_id) else {
            return Err(SchedulerError::TaskNotFound { id: task_id });
        };

        let mut touched: Vec<Uuid> = vec![task_id];
        touched.extend(all_tasks[task_index].next_task_ids.iter().copied());

        let released = guard.apply_completion(task_index, result, &mut all_tasks);
        let now = Utc::now();
        for task in all_tasks.iter_mut().filter(|t| released.contains(&t.id)) {
            task.next_run_time = Some(now);
        }

        let changed: Vec<ScheduledTask> = all_tasks
            .into_iter()
            .filter(|t| touched.contains(&t.id))
            .collect();
        store.update_tasks(&changed).await?;

        Ok(released)
    }

    /// 任务开始分发时由 Ready 转为 Running
    pub async fn mark_task_running(&self, task_id: Uuid, all_tasks: &mut [ScheduledTask]) -> bool {
        let Some(task) = all_tasks.iter_mut().find(|t| t.id == task_id) else {
            return false;
        };
        if task.dag_status != DagTaskStatus::Ready {
            return false;
        }
        let Some(entry) = task
            .dag_workflow_id
            .as_deref()
            .and_then(|workflow_id| self.entry(workflow_id))
        else {
            return false;
        };

        let mut guard = entry.lock().await;
        guard.set_task_status(task, DagTaskStatus::Running);
        guard.recount();
        true
    }

    /// 任务的所有依赖均已完成时返回true
    pub fn can_execute_task(&self, task: &ScheduledTask, all_tasks: &[ScheduledTask]) -> bool {
        DagDependencyChecker::dependencies_satisfied(task, all_tasks)
    }

    pub async fn get_workflow_status(&self, workflow_id: &str) -> Option<WorkflowExecutionStatus> {
        let entry = self.entry(workflow_id)?;
        let guard = entry.lock().await;
        Some(guard.status.clone())
    }

    /// 工作流当前状态，调度器每个tick都会查询
    pub async fn workflow_state(&self, workflow_id: &str) -> Option<WorkflowState> {
        let entry = self.entry(workflow_id)?;
        let guard = entry.lock().await;
        Some(guard.status.state)
    }

    pub async fn pause_workflow(&self, workflow_id: &str) -> bool {
        let Some(entry) = self.entry(workflow_id) else {
            return false;
        };
        let mut guard = entry.lock().await;
        if guard.status.state != WorkflowState::Running {
            return false;
        }
        StructuredLogger::log_workflow_state_changed(
            workflow_id,
            WorkflowState::Running,
            WorkflowState::Paused,
        );
        guard.status.state = WorkflowState::Paused;
        true
    }

    /// 恢复暂停的工作流，重新评估等待中的任务并返回被提升为就绪的任务
    ///
    /// 工作流不存在或不处于暂停状态时返回 `None`。
    pub async fn resume_workflow(
        &self,
        workflow_id: &str,
        all_tasks: &mut [ScheduledTask],
    ) -> Option<Vec<Uuid>> {
        let entry = self.entry(workflow_id)?;
        let mut guard = entry.lock().await;
        if guard.status.state != WorkflowState::Paused {
            return None;
        }
        Some(guard.resume(all_tasks))
    }

    /// 从存储加载任务、恢复工作流并写回被提升的任务，整个过程持有工作流锁
    ///
    /// 暂停期间上游已完成的任务在恢复后的下一个tick即被分发。
    pub async fn resume_stored_workflow(
        &self,
        store: &dyn TaskStore,
        workflow_id: &str,
    ) -> SchedulerResult<Option<Vec<Uuid>>> {
        let Some(entry) = self.entry(workflow_id) else {
            return Ok(None);
        };
        let mut guard = entry.lock().await;
        if guard.status.state != WorkflowState::Paused {
            return Ok(None);
        }

        let mut all_tasks = store.get_all_tasks().await?;
        let promoted = guard.resume(&mut all_tasks);
        let changed: Vec<ScheduledTask> = all_tasks
            .into_iter()
            .filter(|t| promoted.contains(&t.id))
            .collect();
        store.update_tasks(&changed).await?;

        Ok(Some(promoted))
    }

    /// 取消工作流：等待中和就绪的任务标记为 Skipped，执行中的任务不会被中断
    pub async fn cancel_workflow(&self, workflow_id: &str, all_tasks: &mut [ScheduledTask]) -> bool {
        let Some(entry) = self.entry(workflow_id) else {
            return false;
        };
        let mut guard = entry.lock().await;
        if guard.status.state.is_terminal() {
            return false;
        }

        let previous = guard.status.state;
        guard.status.state = WorkflowState::Cancelled;
        guard.status.end_time = Some(Utc::now());
        for task in all_tasks.iter_mut().filter(|t| t.belongs_to(workflow_id)) {
            if matches!(task.dag_status, DagTaskStatus::Waiting | DagTaskStatus::Ready) {
                guard.set_task_status(task, DagTaskStatus::Skipped);
            }
        }
        guard.recount();
        StructuredLogger::log_workflow_state_changed(workflow_id, previous, WorkflowState::Cancelled);
        true
    }

    /// 已知工作流ID列表
    pub fn workflow_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}
