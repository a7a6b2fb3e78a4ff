use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use cronflow_core::{SchedulerError, SchedulerResult, StructuredLogger};

/// 默认心跳超时（秒）
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECONDS: i64 = 30;

/// Worker节点注册表
///
/// 维护 节点URL → 最近一次心跳时间 的权威映射。读写都在内部加锁，
/// 调度tick、心跳处理和分发失败剔除可以并发调用。
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: RwLock<HashMap<String, DateTime<Utc>>>,
}

fn normalize_url(url: &str) -> SchedulerResult<String> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(SchedulerError::invalid_argument("节点URL不能为空"));
    }
    Ok(trimmed.to_string())
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册节点，已存在时刷新心跳时间
    pub fn register(&self, url: &str) -> SchedulerResult<()> {
        let url = normalize_url(url)?;
        let previous = self
            .nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.clone(), Utc::now());
        if previous.is_none() {
            StructuredLogger::log_node_registered(&url);
        }
        Ok(())
    }

    /// 记录心跳，未注册的节点自动注册
    pub fn heartbeat(&self, url: &str) -> SchedulerResult<()> {
        self.heartbeat_at(url, Utc::now())
    }

    /// 以指定时间记录心跳
    pub fn heartbeat_at(&self, url: &str, at: DateTime<Utc>) -> SchedulerResult<()> {
        let url = normalize_url(url)?;
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        match nodes.insert(url.clone(), at) {
            Some(_) => debug!("收到节点心跳: {}", url),
            None => StructuredLogger::log_node_registered(&url),
        }
        Ok(())
    }

    /// 获取存活节点快照，按URL排序
    pub fn get_alive_nodes(&self, timeout: Duration) -> Vec<String> {
        let now = Utc::now();
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        let mut alive: Vec<String> = nodes
            .iter()
            .filter(|(_, last_seen)| now - **last_seen <= timeout)
            .map(|(url, _)| url.clone())
            .collect();
        alive.sort();
        alive
    }

    pub fn get_all_nodes(&self) -> HashMap<String, DateTime<Utc>> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_alive(&self, url: &str, timeout: Duration) -> bool {
        let now = Utc::now();
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url.trim())
            .is_some_and(|last_seen| now - *last_seen <= timeout)
    }

    /// 移除节点，节点不存在时返回 `Ok(false)`
    pub fn remove_node(&self, url: &str) -> SchedulerResult<bool> {
        let url = normalize_url(url)?;
        let removed = self
            .nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&url)
            .is_some();
        if removed {
            debug!("节点已从注册表移除: {}", url);
        }
        Ok(removed)
    }

    /// 移除心跳超时的节点，返回被移除的URL
    pub fn remove_stale_nodes(&self, timeout: Duration) -> Vec<String> {
        let now = Utc::now();
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let mut stale: Vec<String> = nodes
            .iter()
            .filter(|(_, last_seen)| now - **last_seen > timeout)
            .map(|(url, _)| url.clone())
            .collect();
        stale.sort();
        for url in &stale {
            nodes.remove(url);
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
