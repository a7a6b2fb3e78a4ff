use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 工作流整体状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkflowState {
    #[serde(rename = "NOT_STARTED")]
    NotStarted,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "PAUSED")]
    Paused,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "PARTIALLY_FAILED")]
    PartiallyFailed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Completed
                | WorkflowState::PartiallyFailed
                | WorkflowState::Failed
                | WorkflowState::Cancelled
        )
    }
}

/// 工作流执行状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowExecutionStatus {
    pub workflow_id: String,
    pub state: WorkflowState,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub running_tasks: usize,
    pub ready_tasks: usize,
    pub waiting_tasks: usize,
    pub skipped_tasks: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl WorkflowExecutionStatus {
    pub fn new(workflow_id: impl Into<String>, total_tasks: usize) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            state: WorkflowState::Running,
            total_tasks,
            completed_tasks: 0,
            failed_tasks: 0,
            running_tasks: 0,
            ready_tasks: 0,
            waiting_tasks: total_tasks,
            skipped_tasks: 0,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    /// 完成进度百分比
    pub fn progress_percentage(&self) -> f64 {
        if self.total_tasks == 0 {
            0.0
        } else {
            let finished = self.completed_tasks + self.failed_tasks + self.skipped_tasks;
            (finished as f64 / self.total_tasks as f64) * 100.0
        }
    }
}

/// 单个任务的依赖检查结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyCheckResult {
    pub is_valid: bool,
    pub missing_dependency_ids: Vec<Uuid>,
    pub invalid_dependency_ids: Vec<Uuid>,
    pub error_message: Option<String>,
}

/// 循环依赖检测结果
///
/// 每个环以首尾相同的闭合路径表示，例如 `[A, B, C, A]`。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleDetectionResult {
    pub has_cycle: bool,
    pub cycles: Vec<Vec<Uuid>>,
    pub error_message: Option<String>,
}

/// 工作流校验结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowValidationResult {
    pub is_valid: bool,
    pub error_message: Option<String>,
    pub entry_tasks: Vec<Uuid>,
    pub exit_tasks: Vec<Uuid>,
    /// 下标即层级编号，从0开始
    pub execution_levels: Vec<Vec<Uuid>>,
}

impl WorkflowValidationResult {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    /// 查询任务所在层级
    pub fn level_of(&self, task_id: &Uuid) -> Option<usize> {
        self.execution_levels
            .iter()
            .position(|level| level.contains(task_id))
    }
}

/// 启动工作流的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowStartResult {
    pub is_success: bool,
    pub ready_task_count: usize,
    pub ready_task_ids: Vec<Uuid>,
    pub error_message: Option<String>,
}

impl WorkflowStartResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            is_success: false,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}
