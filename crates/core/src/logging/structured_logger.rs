//! Structured logging utilities
//!
//! 调度链路上的关键事件统一从这里输出，每条事件带 `event` 字段，
//! 便于在JSON日志中按事件类型过滤。

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{WorkflowState, TaskExecutionResult};

/// Structured logging utilities
pub struct StructuredLogger;

impl StructuredLogger {
    /// Log task scheduling event
    pub fn log_task_scheduled(task_id: Uuid, task_name: &str, next_run_time: DateTime<Utc>) {
        debug!(
            event = "task_scheduled",
            task.id = %task_id,
            task.name = task_name,
            task.next_run_time = %next_run_time,
            "任务已推进到下一次执行时间"
        );
    }

    /// 任务已分发到Worker节点
    pub fn log_task_dispatched(task_id: Uuid, task_name: &str, node_url: &str) {
        info!(
            event = "task_dispatched",
            task.id = %task_id,
            task.name = task_name,
            node.url = node_url,
            "任务已分发到Worker节点"
        );
    }

    /// 任务执行结束
    pub fn log_task_execution_complete(task_name: &str, result: &TaskExecutionResult) {
        if result.success {
            info!(
                event = "task_execution_complete",
                task.id = %result.task_id,
                task.name = task_name,
                node.url = %result.worker_node_url,
                duration_ms = result.duration_ms().unwrap_or_default(),
                "任务执行成功"
            );
        } else {
            warn!(
                event = "task_execution_failed",
                task.id = %result.task_id,
                task.name = task_name,
                node.url = %result.worker_node_url,
                error = result.error_message.as_deref().unwrap_or_default(),
                "任务执行失败"
            );
        }
    }

    /// 节点被剔除
    pub fn log_node_evicted(node_url: &str, reason: &str) {
        warn!(
            event = "node_evicted",
            node.url = node_url,
            reason = reason,
            "Worker节点已从注册表和负载均衡器中剔除"
        );
    }

    /// 节点注册
    pub fn log_node_registered(node_url: &str) {
        info!(event = "node_registered", node.url = node_url, "Worker节点已注册");
    }

    /// 重试已安排
    pub fn log_retry_scheduled(
        task_id: Uuid,
        task_name: &str,
        retry_count: u32,
        next_retry_time: Option<DateTime<Utc>>,
    ) {
        info!(
            event = "retry_scheduled",
            task.id = %task_id,
            task.name = task_name,
            retry.count = retry_count,
            retry.next_time = ?next_retry_time,
            "任务重试已安排"
        );
    }

    /// 重试次数耗尽
    pub fn log_retry_exhausted(task_id: Uuid, task_name: &str, max_retry_count: u32) {
        error!(
            event = "retry_exhausted",
            task.id = %task_id,
            task.name = task_name,
            retry.max = max_retry_count,
            "任务重试次数已耗尽"
        );
    }

    /// 工作流状态变化
    pub fn log_workflow_state_changed(workflow_id: &str, from: WorkflowState, to: WorkflowState) {
        info!(
            event = "workflow_state_changed",
            workflow.id = workflow_id,
            workflow.from = ?from,
            workflow.to = ?to,
            "工作流状态变化"
        );
    }

    /// DAG下游任务就绪
    pub fn log_dag_tasks_released(workflow_id: Option<&str>, trigger_task_id: Uuid, released: &[Uuid]) {
        if released.is_empty() {
            return;
        }
        info!(
            event = "dag_tasks_released",
            workflow.id = workflow_id.unwrap_or_default(),
            trigger.task_id = %trigger_task_id,
            released.count = released.len(),
            released.ids = ?released,
            "下游任务依赖已满足，进入就绪状态"
        );
    }

    /// Log system error
    pub fn log_system_error(component: &str, operation: &str, error: &dyn std::error::Error) {
        error!(
            event = "system_error",
            component = component,
            operation = operation,
            error = %error,
            "系统错误"
        );
    }
}
