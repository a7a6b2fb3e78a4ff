//! Dispatcher
//!
//! 调度控制面：节点注册表、负载均衡、DAG依赖检查与执行状态机、
//! 任务分发与重试，以及把它们串起来的调度循环。

pub mod cron_utils;
pub mod dag_execution_manager;
pub mod dependency_checker;
pub mod http_client;
pub mod in_memory_store;
pub mod load_balancer;
pub mod node_registry;
pub mod retry_service;
pub mod scheduler;
pub mod strategies;
pub mod task_dispatcher;
pub mod worker_failure_detector;

pub use cron_utils::{next_occurrence, CronScheduler};
pub use dag_execution_manager::DagExecutionManager;
pub use dependency_checker::DagDependencyChecker;
pub use http_client::HttpWorkerClient;
pub use in_memory_store::InMemoryTaskStore;
pub use load_balancer::{LoadBalancer, StrategyInfo};
pub use node_registry::NodeRegistry;
pub use retry_service::{RetryManager, RetryOutcome, RetryService};
pub use scheduler::{TaskScheduler, TickOutcome};
pub use strategies::*;
pub use task_dispatcher::TaskDispatcher;
pub use worker_failure_detector::WorkerFailureDetector;
