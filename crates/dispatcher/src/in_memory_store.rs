use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use cronflow_core::{models::ScheduledTask, traits::TaskStore, SchedulerResult};

/// 内存任务存储，按插入顺序返回任务
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<Vec<ScheduledTask>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<ScheduledTask>) -> Self {
        Self {
            tasks: RwLock::new(tasks),
        }
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    pub async fn remove_task(&self, id: Uuid) -> Option<ScheduledTask> {
        let mut tasks = self.tasks.write().await;
        let index = tasks.iter().position(|t| t.id == id)?;
        Some(tasks.remove(index))
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get_all_tasks(&self) -> SchedulerResult<Vec<ScheduledTask>> {
        Ok(self.tasks.read().await.clone())
    }

    async fn get_task(&self, id: Uuid) -> SchedulerResult<Option<ScheduledTask>> {
        Ok(self.tasks.read().await.iter().find(|t| t.id == id).cloned())
    }

    async fn update_task(&self, task: &ScheduledTask) -> SchedulerResult<()> {
        let mut tasks = self.tasks.write().await;
        match tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task.clone(),
            None => tasks.push(task.clone()),
        }
        Ok(())
    }

    async fn update_tasks(&self, updated: &[ScheduledTask]) -> SchedulerResult<()> {
        let mut tasks = self.tasks.write().await;
        for task in updated {
            match tasks.iter_mut().find(|t| t.id == task.id) {
                Some(existing) => *existing = task.clone(),
                None => tasks.push(task.clone()),
            }
        }
        Ok(())
    }
}
