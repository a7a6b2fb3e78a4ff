use async_trait::async_trait;

use crate::{models::ScheduledTask, SchedulerResult};

/// Worker远程执行接口
///
/// 约定：`POST {node_url}/task/execute`，请求体为任务JSON，2xx视为已接受。
/// 其他状态码、网络错误和超时都必须返回 `SchedulerError::TransportFailure`。
#[async_trait]
pub trait WorkerClient: Send + Sync {
    async fn execute(&self, node_url: &str, task: &ScheduledTask) -> SchedulerResult<()>;
}
