//! Test data builders
//!
//! 带合理默认值的构建器，测试只需要写出关心的字段。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use cronflow_core::models::{link_dependency, DagTaskStatus, RetryStrategy, ScheduledTask};

/// ScheduledTask 构建器
pub struct TaskBuilder {
    task: ScheduledTask,
}

impl TaskBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            task: ScheduledTask::new(name, "* * * * *"),
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.task.id = id;
        self
    }

    pub fn with_cron(mut self, cron_expression: &str) -> Self {
        self.task.cron_expression = cron_expression.to_string();
        self
    }

    pub fn with_workflow(mut self, workflow_id: &str) -> Self {
        self.task.dag_workflow_id = Some(workflow_id.to_string());
        self
    }

    pub fn with_status(mut self, status: DagTaskStatus) -> Self {
        self.task.dag_status = status;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.task.enabled = false;
        self
    }

    /// 立即到期
    pub fn due_now(mut self) -> Self {
        self.task.next_run_time = Some(Utc::now() - chrono::Duration::seconds(1));
        self
    }

    pub fn with_next_run_time(mut self, next_run_time: DateTime<Utc>) -> Self {
        self.task.next_run_time = Some(next_run_time);
        self
    }

    pub fn with_retry(mut self, max_retry_count: u32, interval_seconds: u64, strategy: RetryStrategy) -> Self {
        self.task = self.task.with_retry(max_retry_count, interval_seconds, strategy);
        self
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.task.parameters = parameters;
        self
    }

    pub fn build(self) -> ScheduledTask {
        self.task
    }
}

/// 构建好的工作流，可按名称查找任务
#[derive(Debug, Clone)]
pub struct WorkflowFixture {
    pub workflow_id: String,
    pub tasks: Vec<ScheduledTask>,
    ids: HashMap<String, Uuid>,
}

impl WorkflowFixture {
    pub fn id(&self, name: &str) -> Uuid {
        self.ids[name]
    }

    pub fn task(&self, name: &str) -> &ScheduledTask {
        let id = self.id(name);
        self.tasks.iter().find(|t| t.id == id).unwrap()
    }

    pub fn status_of(&self, tasks: &[ScheduledTask], name: &str) -> DagTaskStatus {
        let id = self.id(name);
        tasks.iter().find(|t| t.id == id).unwrap().dag_status
    }
}

/// 按名称声明任务和依赖边的工作流构建器
///
/// ```rust
/// use cronflow_testing_utils::WorkflowBuilder;
///
/// // T3 依赖 T1 和 T2
/// let wf = WorkflowBuilder::new("wf").edge("T1", "T3").edge("T2", "T3").build();
/// assert_eq!(wf.task("T3").dependencies.len(), 2);
/// ```
pub struct WorkflowBuilder {
    workflow_id: String,
    names: Vec<String>,
    edges: Vec<(String, String)>,
    due_now: bool,
}

impl WorkflowBuilder {
    pub fn new(workflow_id: &str) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            names: Vec::new(),
            edges: Vec::new(),
            due_now: false,
        }
    }

    pub fn task(mut self, name: &str) -> Self {
        if !self.names.iter().any(|n| n == name) {
            self.names.push(name.to_string());
        }
        self
    }

    /// `downstream` 依赖 `upstream`
    pub fn edge(self, upstream: &str, downstream: &str) -> Self {
        let mut builder = self.task(upstream).task(downstream);
        builder
            .edges
            .push((upstream.to_string(), downstream.to_string()));
        builder
    }

    /// 所有任务的 `next_run_time` 设为已到期
    pub fn due_now(mut self) -> Self {
        self.due_now = true;
        self
    }

    pub fn build(self) -> WorkflowFixture {
        let mut tasks: Vec<ScheduledTask> = self
            .names
            .iter()
            .map(|name| {
                let builder = TaskBuilder::new(name).with_workflow(&self.workflow_id);
                if self.due_now {
                    builder.due_now().build()
                } else {
                    builder.build()
                }
            })
            .collect();
        let ids: HashMap<String, Uuid> = tasks.iter().map(|t| (t.name.clone(), t.id)).collect();

        for (upstream, downstream) in &self.edges {
            let up = tasks.iter().position(|t| &t.name == upstream).unwrap();
            let down = tasks.iter().position(|t| &t.name == downstream).unwrap();
            let mut up_task = tasks[up].clone();
            let mut down_task = tasks[down].clone();
            link_dependency(&mut up_task, &mut down_task);
            if up == down {
                // 自依赖，两份副本合并
                down_task.next_task_ids = up_task.next_task_ids.clone();
                tasks[down] = down_task;
            } else {
                tasks[up] = up_task;
                tasks[down] = down_task;
            }
        }

        WorkflowFixture {
            workflow_id: self.workflow_id,
            tasks,
            ids,
        }
    }
}

/// 生成 `count` 个节点URL：`http://worker-1:8080` ...
pub fn node_urls(count: usize) -> Vec<String> {
    (1..=count)
        .map(|i| format!("http://worker-{i}:8080"))
        .collect()
}
