use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use cronflow_core::{
    config::DispatchConfig, models::ScheduledTask, traits::WorkerClient, SchedulerError,
    SchedulerResult,
};

/// 基于HTTP的Worker客户端
///
/// 向 `{node_url}/task/execute` POST任务JSON，每个请求都带超时。
#[derive(Debug, Clone)]
pub struct HttpWorkerClient {
    http_client: reqwest::Client,
    timeout: Duration,
}

impl HttpWorkerClient {
    pub fn new(timeout: Duration) -> SchedulerResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SchedulerError::Configuration(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self {
            http_client,
            timeout,
        })
    }

    pub fn from_config(config: &DispatchConfig) -> SchedulerResult<Self> {
        Self::new(Duration::from_secs(config.request_timeout_seconds))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn execute_url(node_url: &str) -> String {
        format!("{}/task/execute", node_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn execute(&self, node_url: &str, task: &ScheduledTask) -> SchedulerResult<()> {
        let url = Self::execute_url(node_url);
        debug!("向节点 {} 发送任务 {}", url, task.name);

        match self.http_client.post(&url).json(task).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    Ok(())
                } else {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    warn!("节点 {} 拒绝执行任务 {}: HTTP {}", node_url, task.name, status);
                    Err(SchedulerError::transport(
                        node_url,
                        format!("HTTP {status} - {body}"),
                    ))
                }
            }
            Err(e) => {
                let message = if e.is_timeout() {
                    format!("请求超时 ({}秒): {e}", self.timeout.as_secs())
                } else {
                    format!("连接失败: {e}")
                };
                warn!("调用节点 {} 失败: {}", node_url, message);
                Err(SchedulerError::transport(node_url, message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_url_strips_trailing_slash() {
        assert_eq!(
            HttpWorkerClient::execute_url("http://w1:8080/"),
            "http://w1:8080/task/execute"
        );
        assert_eq!(
            HttpWorkerClient::execute_url("http://w1:8080"),
            "http://w1:8080/task/execute"
        );
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_failure() {
        let client = HttpWorkerClient::new(Duration::from_secs(2)).unwrap();
        let task = ScheduledTask::new("t", "* * * * *");
        let result = client.execute("http://127.0.0.1:1", &task).await;
        assert!(matches!(
            result,
            Err(SchedulerError::TransportFailure { ref node_url, .. }) if node_url == "http://127.0.0.1:1"
        ));
    }
}
