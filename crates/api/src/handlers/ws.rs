use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;

use platform_gateway::ws::handle_socket;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// 模块注册时获得的身份哈希
    pub hash: String,
}

/// GET /ws?hash=...
///
/// 升级为WebSocket会话，鉴权与生命周期管理在网关侧完成。
pub async fn upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let ctx = state.conn_ctx.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, query.hash, ctx))
}
