use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 默认的优雅关闭等待时间
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// 优雅关闭管理器
///
/// 调度循环和失效检测循环各自订阅关闭信号；触发关闭后在宽限期内等待
/// 它们退出，超时则放弃等待。
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_tx: Arc<RwLock<Option<broadcast::Sender<()>>>>,
    is_shutdown: Arc<RwLock<bool>>,
    grace_period: Duration,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::with_grace_period(DEFAULT_GRACE_PERIOD)
    }

    pub fn with_grace_period(grace_period: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            shutdown_tx: Arc::new(RwLock::new(Some(shutdown_tx))),
            is_shutdown: Arc::new(RwLock::new(false)),
            grace_period,
        }
    }

    /// 订阅关闭信号，已关闭时返回立即可读的接收器
    pub async fn subscribe(&self) -> broadcast::Receiver<()> {
        let shutdown_tx = self.shutdown_tx.read().await;
        match shutdown_tx.as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(1);
                let _ = tx.send(());
                rx
            }
        }
    }

    /// 触发关闭，重复调用无效果
    pub async fn shutdown(&self) {
        let mut is_shutdown = self.is_shutdown.write().await;
        if *is_shutdown {
            debug!("关闭信号已经发送过");
            return;
        }
        *is_shutdown = true;

        let mut shutdown_tx = self.shutdown_tx.write().await;
        if let Some(tx) = shutdown_tx.take() {
            debug!("发送关闭信号给 {} 个订阅者", tx.receiver_count());
            // 没有订阅者时发送失败，可以忽略
            let _ = tx.send(());
        }
        info!("关闭信号已发送");
    }

    pub async fn is_shutdown(&self) -> bool {
        *self.is_shutdown.read().await
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// 在宽限期内等待后台任务结束，全部按时结束返回true
    pub async fn drain<T>(&self, handles: Vec<JoinHandle<T>>) -> bool {
        let wait_all = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    error!("后台任务异常退出: {e}");
                }
            }
        };

        match tokio::time::timeout(self.grace_period, wait_all).await {
            Ok(()) => {
                info!("后台任务已全部退出");
                true
            }
            Err(_) => {
                warn!("等待后台任务退出超时 ({:?})，强制退出", self.grace_period);
                false
            }
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
