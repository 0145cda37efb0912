use std::collections::HashMap;

use tokio::sync::{mpsc, Mutex};

use platform_core::{PlatformError, PlatformResult};
use platform_domain::messages::ResultFrame;

/// 会话关闭原因，决定发给模块的关闭帧文案
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// 同一模块建立了新会话，旧会话被顶替
    Replaced,
    /// 管理接口主动关闭
    Admin,
}

/// 会话网关产生的事件，由调度侧消费
#[derive(Debug)]
pub enum GatewayEvent {
    /// 模块上报的执行结果
    Result {
        module_hash: String,
        frame: ResultFrame,
    },
}

/// 单个在线会话的控制句柄
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: String,
    /// 出站文本帧队列，有界，满时下发立即失败
    pub outbound: mpsc::Sender<String>,
    /// 关闭信号通道
    pub close: mpsc::Sender<CloseReason>,
}

/// 会话网关：模块哈希到在线会话的映射
///
/// 下发走每会话的有界队列，绑定、查询和下发都在同一把锁下
/// 完成，保证在线判断与入队之间不会插入断开。
pub struct SessionGateway {
    sessions: Mutex<HashMap<String, SessionHandle>>,
    events: mpsc::Sender<GatewayEvent>,
}

impl SessionGateway {
    pub fn new(event_buffer: usize) -> (Self, mpsc::Receiver<GatewayEvent>) {
        let (events, rx) = mpsc::channel(event_buffer);
        (
            Self {
                sessions: Mutex::new(HashMap::new()),
                events,
            },
            rx,
        )
    }

    /// 绑定会话，返回被顶替的旧会话句柄（由调用方发送关闭信号）
    pub async fn bind(&self, module_hash: &str, handle: SessionHandle) -> Option<SessionHandle> {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(module_hash.to_string(), handle)
    }

    /// 解绑会话，仅当仍绑定着该session_id时生效
    pub async fn unbind(&self, module_hash: &str, session_id: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(module_hash) {
            Some(handle) if handle.session_id == session_id => {
                sessions.remove(module_hash);
                true
            }
            _ => false,
        }
    }

    pub async fn is_connected(&self, module_hash: &str) -> bool {
        self.sessions.lock().await.contains_key(module_hash)
    }

    /// 向模块下发一条文本帧
    ///
    /// 不在线立即返回NotConnected；队列满或会话刚关闭同样
    /// 快速失败，不阻塞调度循环。
    pub async fn send(&self, module_hash: &str, text: String) -> PlatformResult<()> {
        let sessions = self.sessions.lock().await;
        let handle = sessions
            .get(module_hash)
            .ok_or_else(|| PlatformError::NotConnected {
                hash: module_hash.to_string(),
            })?;
        handle.outbound.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                PlatformError::Internal(format!("模块 {module_hash} 的出站队列已满"))
            }
            mpsc::error::TrySendError::Closed(_) => PlatformError::NotConnected {
                hash: module_hash.to_string(),
            },
        })
    }

    /// 主动关闭模块的会话
    pub async fn close(&self, module_hash: &str, reason: CloseReason) -> PlatformResult<()> {
        let sessions = self.sessions.lock().await;
        let handle = sessions
            .get(module_hash)
            .ok_or_else(|| PlatformError::NotConnected {
                hash: module_hash.to_string(),
            })?;
        // 接收端退出时通道已关，视为已经关闭
        let _ = handle.close.try_send(reason);
        Ok(())
    }

    /// 上报一条网关事件
    pub async fn publish(&self, event: GatewayEvent) {
        if self.events.send(event).await.is_err() {
            tracing::warn!("网关事件通道已关闭，事件被丢弃");
        }
    }

    pub async fn online_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
