use tokio::sync::broadcast;

/// 基于广播通道的停止信号管理
#[derive(Clone)]
pub struct ShutdownManager {
    tx: broadcast::Sender<()>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(4);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// 广播停止信号，没有接收者时忽略
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }

    /// 等待进程收到终止信号（Ctrl+C或SIGTERM）
    pub async fn wait_for_signal() {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("监听Ctrl+C失败: {}", e);
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!("监听SIGTERM失败: {}", e);
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_reaches_all_subscribers() {
        let manager = ShutdownManager::new();
        let mut a = manager.subscribe();
        let mut b = manager.subscribe();
        manager.shutdown();
        assert!(a.recv().await.is_ok());
        assert!(b.recv().await.is_ok());
    }
}
