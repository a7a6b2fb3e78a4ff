//! 任务存储接口定义
//!
//! 核心只把任务存储当作一项能力来使用：调度器每个tick读取全部任务，
//! DAG执行管理器和重试管理器在原地修改任务后写回。关系型数据库等具体实现
//! 属于外部协作方，内存实现见 `cronflow_dispatcher::in_memory_store`。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use cronflow_core::traits::TaskStore;
//!
//! async fn advance(store: &dyn TaskStore) -> SchedulerResult<()> {
//!     for mut task in store.get_all_tasks().await? {
//!         task.next_run_time = Some(chrono::Utc::now());
//!         store.update_task(&task).await?;
//!     }
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use uuid::Uuid;

use crate::{models::ScheduledTask, SchedulerResult};

/// 任务存储接口
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 获取全部任务
    async fn get_all_tasks(&self) -> SchedulerResult<Vec<ScheduledTask>>;

    /// 根据ID获取任务
    async fn get_task(&self, id: Uuid) -> SchedulerResult<Option<ScheduledTask>>;

    /// 写回任务（不存在时插入）
    async fn update_task(&self, task: &ScheduledTask) -> SchedulerResult<()>;

    /// 批量写回
    async fn update_tasks(&self, tasks: &[ScheduledTask]) -> SchedulerResult<()> {
        for task in tasks {
            self.update_task(task).await?;
        }
        Ok(())
    }
}
