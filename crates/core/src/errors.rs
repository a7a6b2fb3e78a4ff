use thiserror::Error;
use uuid::Uuid;

/// 调度器错误类型定义
///
/// 校验类失败（循环依赖、缺失依赖等）不走这里，而是通过结果结构体返回。
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: Uuid },

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("无效操作: {0}")]
    InvalidOperation(String),

    #[error("没有可用的Worker节点")]
    NoAvailableNodes,

    #[error("所有Worker节点均已达到最大连接数: {max_connections}")]
    AllNodesSaturated { max_connections: u32 },

    #[error("远程调用失败 [{node_url}]: {message}")]
    TransportFailure { node_url: String, message: String },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// 是否为节点选择失败（不可通过重试恢复）
    pub fn is_selection_failure(&self) -> bool {
        matches!(
            self,
            SchedulerError::NoAvailableNodes | SchedulerError::AllNodesSaturated { .. }
        )
    }

    /// 是否为远程调用失败
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, SchedulerError::TransportFailure { .. })
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        SchedulerError::InvalidArgument(message.into())
    }

    pub fn transport(node_url: impl Into<String>, message: impl Into<String>) -> Self {
        SchedulerError::TransportFailure {
            node_url: node_url.into(),
            message: message.into(),
        }
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, SchedulerError>;
