pub mod config;
pub mod errors;
pub mod logging;
pub mod metrics_collector;
pub mod models;
pub mod traits;

pub use errors::*;
pub use logging::StructuredLogger;
pub use metrics_collector::MetricsCollector;
pub use models::{
    DagTaskStatus, ExecutionStatus, RetryStrategy, ScheduledTask, TaskExecutionResult,
    WorkflowExecutionStatus, WorkflowState,
};
pub use traits::{LoadBalancingStrategy, TaskCompletionListener, TaskStore, WorkerClient};

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
