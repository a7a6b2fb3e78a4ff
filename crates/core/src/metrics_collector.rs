//! Metrics collector
//!
//! 只通过 `metrics` 门面记录指标，导出器由部署方安装；未安装时所有记录都是空操作。

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};

/// 调度核心指标
pub struct MetricsCollector {
    tasks_dispatched_total: Counter,
    task_failures_total: Counter,
    task_retries_total: Counter,
    node_evictions_total: Counter,
    alive_nodes: Gauge,
    scheduling_tick_duration: Histogram,
    task_execution_duration: Histogram,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            tasks_dispatched_total: counter!("cronflow_tasks_dispatched_total"),
            task_failures_total: counter!("cronflow_task_failures_total"),
            task_retries_total: counter!("cronflow_task_retries_total"),
            node_evictions_total: counter!("cronflow_node_evictions_total"),
            alive_nodes: gauge!("cronflow_alive_nodes"),
            scheduling_tick_duration: histogram!("cronflow_scheduling_tick_duration_seconds"),
            task_execution_duration: histogram!("cronflow_task_execution_duration_seconds"),
        }
    }

    pub fn record_dispatch(&self) {
        self.tasks_dispatched_total.increment(1);
    }

    pub fn record_task_failure(&self) {
        self.task_failures_total.increment(1);
    }

    pub fn record_retry(&self) {
        self.task_retries_total.increment(1);
    }

    pub fn record_node_eviction(&self) {
        self.node_evictions_total.increment(1);
    }

    pub fn set_alive_nodes(&self, count: usize) {
        self.alive_nodes.set(count as f64);
    }

    pub fn record_scheduling_duration(&self, duration_seconds: f64) {
        self.scheduling_tick_duration.record(duration_seconds);
    }

    pub fn record_execution_duration(&self, duration_seconds: f64) {
        self.task_execution_duration.record(duration_seconds);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
