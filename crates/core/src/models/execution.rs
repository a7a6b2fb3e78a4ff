use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 单次执行的状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionStatus {
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
}

/// 任务执行结果
///
/// 由分发器构造，构造后不再修改；DAG执行管理器和重试管理器只读取。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskExecutionResult {
    pub task_id: Uuid,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub success: bool,
    pub worker_node_url: String,
    pub error_message: Option<String>,
    pub error_detail: Option<String>,
}

impl TaskExecutionResult {
    /// 构造执行成功的结果
    pub fn completed(task_id: Uuid, worker_node_url: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            task_id,
            status: ExecutionStatus::Completed,
            start_time,
            end_time: Some(Utc::now()),
            success: true,
            worker_node_url: worker_node_url.into(),
            error_message: None,
            error_detail: None,
        }
    }

    /// 构造执行失败的结果
    pub fn failed(
        task_id: Uuid,
        worker_node_url: impl Into<String>,
        start_time: DateTime<Utc>,
        error_message: impl Into<String>,
        error_detail: Option<String>,
    ) -> Self {
        Self {
            task_id,
            status: ExecutionStatus::Failed,
            start_time,
            end_time: Some(Utc::now()),
            success: false,
            worker_node_url: worker_node_url.into(),
            error_message: Some(error_message.into()),
            error_detail,
        }
    }

    /// 执行耗时（毫秒），未结束时返回 None
    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_and_failed_results() {
        let id = Uuid::new_v4();
        let started = Utc::now();

        let ok = TaskExecutionResult::completed(id, "http://w1", started);
        assert!(ok.success);
        assert_eq!(ok.status, ExecutionStatus::Completed);
        assert!(ok.error_message.is_none());
        assert!(ok.duration_ms().unwrap() >= 0);

        let failed = TaskExecutionResult::failed(id, "http://w1", started, "HTTP 503", None);
        assert!(!failed.success);
        assert_eq!(failed.status, ExecutionStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("HTTP 503"));
    }
}
