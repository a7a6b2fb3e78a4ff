//! # Cronflow Testing Utils
//!
//! 各crate测试共用的工具：任务与工作流构建器、Worker客户端和完成监听器的
//! 测试替身，以及异步等待辅助函数。
//!
//! ```toml
//! [dev-dependencies]
//! cronflow-testing-utils = { path = "../testing-utils" }
//! ```
//!
//! ```rust
//! use cronflow_testing_utils::{MockWorkerClient, WorkflowBuilder};
//!
//! let workflow = WorkflowBuilder::new("wf").edge("A", "B").build();
//! let client = MockWorkerClient::new();
//! client.fail_node("http://w1");
//! assert_eq!(workflow.tasks.len(), 2);
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
