//! Test doubles
//!
//! Worker客户端和完成监听器的内存实现，按节点URL脚本化返回结果并记录调用。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use cronflow_core::{
    models::{ScheduledTask, TaskExecutionResult},
    traits::{TaskCompletionListener, WorkerClient},
    SchedulerError, SchedulerResult,
};

/// 单次调用的预设结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutcome {
    Accept,
    Reject,
}

/// 一次远程调用的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub node_url: String,
    pub task_id: Uuid,
}

/// Mock implementation of WorkerClient for testing
///
/// 默认接受所有调用。`fail_node` 让节点永久失败，`script` 为节点预设
/// 按顺序消费的结果，脚本用完后回到默认行为。
#[derive(Debug, Default)]
pub struct MockWorkerClient {
    failing_nodes: Mutex<HashSet<String>>,
    scripts: Mutex<HashMap<String, VecDeque<MockOutcome>>>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Mutex<Option<Duration>>,
}

impl MockWorkerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_node(&self, node_url: &str) {
        self.failing_nodes
            .lock()
            .unwrap()
            .insert(node_url.to_string());
    }

    pub fn heal_node(&self, node_url: &str) {
        self.failing_nodes.lock().unwrap().remove(node_url);
    }

    pub fn script(&self, node_url: &str, outcomes: &[MockOutcome]) {
        self.scripts
            .lock()
            .unwrap()
            .entry(node_url.to_string())
            .or_default()
            .extend(outcomes.iter().copied());
    }

    /// 每次调用前等待，用于模拟慢节点
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_to(&self, node_url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.node_url == node_url)
            .count()
    }

    pub fn calls_for_task(&self, task_id: Uuid) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.task_id == task_id)
            .count()
    }

    fn next_outcome(&self, node_url: &str) -> MockOutcome {
        if let Some(outcome) = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(node_url)
            .and_then(|queue| queue.pop_front())
        {
            return outcome;
        }
        if self.failing_nodes.lock().unwrap().contains(node_url) {
            MockOutcome::Reject
        } else {
            MockOutcome::Accept
        }
    }
}

#[async_trait]
impl WorkerClient for MockWorkerClient {
    async fn execute(&self, node_url: &str, task: &ScheduledTask) -> SchedulerResult<()> {
        self.calls.lock().unwrap().push(RecordedCall {
            node_url: node_url.to_string(),
            task_id: task.id,
        });

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.next_outcome(node_url) {
            MockOutcome::Accept => Ok(()),
            MockOutcome::Reject => Err(SchedulerError::transport(node_url, "HTTP 503 - mock rejection")),
        }
    }
}

/// 记录所有完成通知的监听器
#[derive(Debug, Default)]
pub struct RecordingListener {
    results: Mutex<Vec<TaskExecutionResult>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<TaskExecutionResult> {
        self.results.lock().unwrap().clone()
    }

    pub fn successes(&self) -> usize {
        self.results.lock().unwrap().iter().filter(|r| r.success).count()
    }

    pub fn failures(&self) -> usize {
        self.results.lock().unwrap().iter().filter(|r| !r.success).count()
    }
}

#[async_trait]
impl TaskCompletionListener for RecordingListener {
    async fn on_task_completed(&self, _task: &ScheduledTask, result: &TaskExecutionResult) {
        self.results.lock().unwrap().push(result.clone());
    }
}
