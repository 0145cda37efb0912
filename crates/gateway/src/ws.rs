use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use platform_core::PlatformError;
use platform_domain::messages::Frame;

use crate::registry::ModuleRegistry;
use crate::session::{CloseReason, GatewayEvent, SessionGateway, SessionHandle};

/// 连续错过的Pong次数达到该值后判定会话失活
const MAX_MISSED_PONGS: u32 = 2;

/// WebSocket连接处理所需的共享上下文
#[derive(Clone)]
pub struct ConnectionContext {
    pub registry: Arc<ModuleRegistry>,
    pub sessions: Arc<SessionGateway>,
    pub ping_interval: Duration,
    pub outbound_queue_size: usize,
}

/// 处理一条模块WebSocket连接的完整生命周期
///
/// 鉴权、顶替旧会话、收发循环、保活检测和断开清理都在
/// 这里完成；任何一步失败都会关闭连接并解绑会话。
pub async fn handle_socket(mut socket: WebSocket, module_hash: String, ctx: ConnectionContext) {
    // 鉴权：哈希必须对应已注册的模块
    let module = match ctx.registry.get(&module_hash).await {
        Ok(Some(module)) => module,
        Ok(None) => {
            tracing::warn!(hash = %module_hash, "拒绝未注册模块的连接");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: 4004,
                    reason: "未注册的模块哈希".into(),
                })))
                .await;
            return;
        }
        Err(e) => {
            tracing::error!(hash = %module_hash, "查询模块失败: {}", e);
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let session_id = Uuid::new_v4().to_string();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(ctx.outbound_queue_size);
    let (close_tx, mut close_rx) = mpsc::channel::<CloseReason>(1);

    // 后写者胜：同一模块的新连接顶替旧连接
    let evicted = ctx
        .sessions
        .bind(
            &module_hash,
            SessionHandle {
                session_id: session_id.clone(),
                outbound: out_tx,
                close: close_tx,
            },
        )
        .await;
    if let Some(old) = evicted {
        tracing::info!(
            hash = %module_hash,
            old_session = %old.session_id,
            "模块重复连接，关闭旧会话"
        );
        let _ = old.close.try_send(CloseReason::Replaced);
    }

    if let Err(e) = ctx.registry.bind_session(&module_hash, &session_id).await {
        tracing::error!(hash = %module_hash, "绑定会话失败: {}", e);
        ctx.sessions.unbind(&module_hash, &session_id).await;
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    tracing::info!(
        hash = %module_hash,
        session_id = %session_id,
        "模块上线: {}",
        module.name
    );

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut ping_timer = tokio::time::interval(ctx.ping_interval);
    // 第一次tick立即返回，跳过以免刚连上就计一次未响应
    ping_timer.tick().await;
    let mut missed_pongs: u32 = 0;

    loop {
        tokio::select! {
            outbound = out_rx.recv() => {
                match outbound {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            tracing::warn!(hash = %module_hash, "下发消息失败，关闭会话");
                            break;
                        }
                    }
                    None => break,
                }
            }
            reason = close_rx.recv() => {
                let reason = reason.unwrap_or(CloseReason::Admin);
                let text = match reason {
                    CloseReason::Replaced => "会话已被新连接顶替",
                    CloseReason::Admin => "管理端关闭会话",
                };
                let _ = ws_tx
                    .send(Message::Close(Some(CloseFrame {
                        code: 4000,
                        reason: text.into(),
                    })))
                    .await;
                break;
            }
            _ = ping_timer.tick() => {
                if missed_pongs >= MAX_MISSED_PONGS {
                    tracing::warn!(
                        hash = %module_hash,
                        session_id = %session_id,
                        "连续 {} 次未收到Pong，判定会话失活",
                        missed_pongs
                    );
                    break;
                }
                missed_pongs += 1;
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Pong(_))) => {
                        missed_pongs = 0;
                        if let Err(e) = ctx.registry.mark_alive(&module_hash).await {
                            tracing::warn!(hash = %module_hash, "刷新存活时间失败: {}", e);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Text(text))) => {
                        handle_text_frame(&ctx, &module_hash, text.as_str()).await;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        tracing::warn!(hash = %module_hash, "忽略二进制帧");
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!(hash = %module_hash, session_id = %session_id, "模块主动断开");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(hash = %module_hash, "会话读取错误: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    // 清理：仅当仍是当前会话时解除在线标记
    if ctx.sessions.unbind(&module_hash, &session_id).await {
        match ctx.registry.unbind_session(&module_hash, &session_id).await {
            Ok(true) => {
                tracing::info!(hash = %module_hash, session_id = %session_id, "模块下线");
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(hash = %module_hash, "解绑会话失败: {}", e);
            }
        }
    }
}

/// 处理模块发来的文本帧，格式错误只记日志不断开
async fn handle_text_frame(ctx: &ConnectionContext, module_hash: &str, text: &str) {
    match serde_json::from_str::<Frame>(text) {
        Ok(Frame::Result(frame)) => {
            tracing::debug!(
                hash = %module_hash,
                workflow_id = frame.workflow_id,
                "收到执行结果上报"
            );
            ctx.sessions
                .publish(GatewayEvent::Result {
                    module_hash: module_hash.to_string(),
                    frame,
                })
                .await;
        }
        Ok(Frame::Execute { .. }) => {
            tracing::warn!(hash = %module_hash, "模块不应发送执行指令帧，已忽略");
        }
        Err(e) => {
            let err = PlatformError::MalformedFrame(e.to_string());
            tracing::warn!(hash = %module_hash, "{}", err);
        }
    }
}
