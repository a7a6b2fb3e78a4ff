//! Cronflow
//!
//! 分布式DAG任务调度系统的可执行程序组装层。

pub mod app;
pub mod shutdown;
