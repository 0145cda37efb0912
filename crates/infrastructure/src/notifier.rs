use async_trait::async_trait;
use tokio::sync::Mutex;

use platform_domain::messages::FailureNotification;
use platform_domain::repositories::Notifier;

/// 以结构化日志输出失败通知
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, notification: FailureNotification) {
        tracing::warn!(
            workflow_id = notification.workflow_id,
            "失败通知: {}",
            notification.summary()
        );
    }
}

/// 记录收到的通知，供测试断言使用
pub struct RecordingNotifier {
    received: Mutex<Vec<FailureNotification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            received: Mutex::new(Vec::new()),
        }
    }

    pub async fn take(&self) -> Vec<FailureNotification> {
        std::mem::take(&mut *self.received.lock().await)
    }

    pub async fn count(&self) -> usize {
        self.received.lock().await.len()
    }
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: FailureNotification) {
        self.received.lock().await.push(notification);
    }
}
