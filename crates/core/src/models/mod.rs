pub mod execution;
pub mod task;
pub mod workflow;

pub use execution::{ExecutionStatus, TaskExecutionResult};
pub use task::{link_dependency, DagTaskStatus, RetryStrategy, ScheduledTask};
pub use workflow::{
    CycleDetectionResult, DependencyCheckResult, WorkflowExecutionStatus, WorkflowStartResult,
    WorkflowState, WorkflowValidationResult,
};
