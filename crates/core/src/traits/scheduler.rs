use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::{
    models::{ScheduledTask, TaskExecutionResult},
    SchedulerResult,
};

/// 策略配置，键值均为字符串，便于从配置文件或管理接口直接传入
pub type StrategyConfiguration = BTreeMap<String, String>;

/// 负载均衡策略接口
///
/// `nodes` 为当前存活节点（已按URL排序），`loads` 为负载均衡器维护的
/// 在途任务计数。策略自行决定节点是否可用，没有可用节点时返回
/// `SchedulerError::AllNodesSaturated`。
pub trait LoadBalancingStrategy: Send + Sync {
    /// 获取策略名称
    fn name(&self) -> &str;

    /// 选择执行任务的节点
    fn select_node(
        &self,
        nodes: &[String],
        task: &ScheduledTask,
        loads: &BTreeMap<String, u32>,
    ) -> SchedulerResult<String>;

    /// 获取当前配置
    fn configuration(&self) -> StrategyConfiguration;

    /// 更新配置，未识别的键忽略
    fn update_configuration(&self, config: &StrategyConfiguration) -> SchedulerResult<()>;
}

/// 任务执行完成回调
///
/// 分发器在远程调用结束后（无论成功失败）调用一次。
#[async_trait]
pub trait TaskCompletionListener: Send + Sync {
    async fn on_task_completed(&self, task: &ScheduledTask, result: &TaskExecutionResult);
}
