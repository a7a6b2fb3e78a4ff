use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 调度任务定义
///
/// 表示系统中可调度执行的任务单元，既可以是独立的周期任务，也可以是某个DAG工作流中的节点。
///
/// # 字段说明
///
/// - `id`: 任务的唯一标识符
/// - `cron_expression`: cron 表达式，支持5段和6段（带秒）两种格式
/// - `next_run_time`: 下一次到期时间，由调度器在每次分发后推进
/// - `parameters`: 交给Worker处理器的参数，核心不解析其内容
/// - `dag_*` / `*_dependencies_count`: DAG执行状态，由DAG执行管理器维护
/// - `*_retry_*`: 重试配置及重试进度，由重试管理器维护
///
/// # 使用示例
///
/// ```rust
/// use cronflow_core::models::{RetryStrategy, ScheduledTask};
/// use serde_json::json;
///
/// let task = ScheduledTask::new("数据备份", "0 2 * * *")
///     .with_task_type("shell")
///     .with_parameters(json!({"command": "backup.sh"}))
///     .with_retry(3, 30, RetryStrategy::Exponential);
/// assert!(task.enabled);
/// assert!(task.enable_retry);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledTask {
    pub id: Uuid,
    pub name: String,
    pub cron_expression: String,
    pub enabled: bool,
    #[serde(default)]
    pub next_run_time: Option<DateTime<Utc>>,
    #[serde(default = "default_task_type")]
    pub task_type: String, // "shell", "http", "sql" 等，由Worker端解释
    #[serde(default)]
    pub parameters: serde_json::Value,

    #[serde(default)]
    pub dag_workflow_id: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeSet<Uuid>,
    #[serde(default)]
    pub next_task_ids: BTreeSet<Uuid>,
    #[serde(default)]
    pub dag_status: DagTaskStatus,
    #[serde(default)]
    pub total_dependencies_count: u32,
    #[serde(default)]
    pub completed_dependencies_count: u32,

    #[serde(default)]
    pub enable_retry: bool,
    #[serde(default)]
    pub max_retry_count: u32,
    #[serde(default)]
    pub current_retry_count: u32,
    #[serde(default)]
    pub retry_interval_seconds: u64,
    #[serde(default)]
    pub retry_strategy: RetryStrategy,
    #[serde(default)]
    pub next_retry_time: Option<DateTime<Utc>>,
}

fn default_task_type() -> String {
    "http".to_string()
}

/// DAG中单个任务的执行状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum DagTaskStatus {
    #[default]
    #[serde(rename = "WAITING")]
    Waiting,
    #[serde(rename = "READY")]
    Ready,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "SKIPPED")]
    Skipped,
}

impl DagTaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DagTaskStatus::Completed | DagTaskStatus::Failed | DagTaskStatus::Skipped
        )
    }
}

/// 重试间隔计算策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum RetryStrategy {
    /// 固定间隔
    #[default]
    #[serde(rename = "FIXED")]
    Fixed,
    /// 线性增长: base × n
    #[serde(rename = "LINEAR")]
    Linear,
    /// 指数退避: base × 2^(n-1)
    #[serde(rename = "EXPONENTIAL")]
    Exponential,
}

impl ScheduledTask {
    /// 创建新任务
    pub fn new(name: impl Into<String>, cron_expression: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            cron_expression: cron_expression.into(),
            enabled: true,
            next_run_time: None,
            task_type: default_task_type(),
            parameters: serde_json::Value::Null,
            dag_workflow_id: None,
            dependencies: BTreeSet::new(),
            next_task_ids: BTreeSet::new(),
            dag_status: DagTaskStatus::Waiting,
            total_dependencies_count: 0,
            completed_dependencies_count: 0,
            enable_retry: false, // 默认不重试
            max_retry_count: 0,
            current_retry_count: 0,
            retry_interval_seconds: 0,
            retry_strategy: RetryStrategy::Fixed,
            next_retry_time: None,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = task_type.into();
        self
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_workflow(mut self, workflow_id: impl Into<String>) -> Self {
        self.dag_workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_next_run_time(mut self, next_run_time: DateTime<Utc>) -> Self {
        self.next_run_time = Some(next_run_time);
        self
    }

    /// 启用重试
    pub fn with_retry(
        mut self,
        max_retry_count: u32,
        retry_interval_seconds: u64,
        retry_strategy: RetryStrategy,
    ) -> Self {
        self.enable_retry = true;
        self.max_retry_count = max_retry_count;
        self.retry_interval_seconds = retry_interval_seconds;
        self.retry_strategy = retry_strategy;
        self
    }

    /// 检查任务是否有依赖
    pub fn has_dependencies(&self) -> bool {
        !self.dependencies.is_empty()
    }

    /// 检查任务是否属于某个DAG工作流
    pub fn is_dag_member(&self) -> bool {
        self.dag_workflow_id.is_some()
    }

    pub fn belongs_to(&self, workflow_id: &str) -> bool {
        self.dag_workflow_id.as_deref() == Some(workflow_id)
    }

    /// 任务是否到期：已启用且 `next_run_time <= now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run_time.is_some_and(|t| t <= now)
    }

    /// 是否有到期的待重试执行
    pub fn is_retry_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled
            && self.enable_retry
            && self.current_retry_count < self.max_retry_count
            && self.next_retry_time.is_some_and(|t| t <= now)
    }
}

/// 建立双向依赖：`downstream` 依赖 `upstream`
///
/// 同时维护上游的 `next_task_ids`，这是DAG执行管理器推进下游任务时使用的边。
pub fn link_dependency(upstream: &mut ScheduledTask, downstream: &mut ScheduledTask) {
    downstream.dependencies.insert(upstream.id);
    downstream.total_dependencies_count = downstream.dependencies.len() as u32;
    upstream.next_task_ids.insert(downstream.id);
}
