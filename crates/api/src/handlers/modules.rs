use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use platform_core::PlatformError;
use platform_domain::entities::Module;
use platform_gateway::CloseReason;

use crate::error::ApiResult;
use crate::response::ApiResponse;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterQuery {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON字符串形式的输入需求声明
    #[serde(default)]
    pub input_data: Option<String>,
    #[serde(default)]
    pub output_data: Option<String>,
}

fn parse_declaration(raw: &Option<String>) -> Result<serde_json::Value, PlatformError> {
    match raw {
        None => Ok(serde_json::json!({})),
        Some(s) => serde_json::from_str(s)
            .map_err(|e| PlatformError::Validation(format!("数据需求声明不是合法JSON: {e}"))),
    }
}

/// GET /api/module/register
///
/// 重复注册幂等，同一名称和输入需求返回同一个哈希。
pub async fn register(
    State(state): State<AppState>,
    Query(query): Query<RegisterQuery>,
) -> ApiResult<Json<ApiResponse<Module>>> {
    let input = parse_declaration(&query.input_data)?;
    let output = parse_declaration(&query.output_data)?;
    let module = state
        .registry
        .register(&query.name, &query.description, &input, &output)
        .await?;
    Ok(Json(ApiResponse::success(module)))
}

/// GET /api/module/list
pub async fn list(State(state): State<AppState>) -> ApiResult<Json<ApiResponse<Vec<Module>>>> {
    let modules = state.registry.list().await?;
    Ok(Json(ApiResponse::success(modules)))
}

/// GET /api/module/online
pub async fn online(State(state): State<AppState>) -> ApiResult<Json<ApiResponse<Vec<Module>>>> {
    let modules = state.registry.list_online().await?;
    Ok(Json(ApiResponse::success(modules)))
}

#[derive(Debug, Deserialize)]
pub struct ModuleTarget {
    pub module_hash: Option<String>,
    pub module_name: Option<String>,
}

/// 按哈希或名称定位模块，哈希优先
pub async fn resolve_module(state: &AppState, target: &ModuleTarget) -> ApiResult<Module> {
    if let Some(hash) = &target.module_hash {
        return Ok(state
            .registry
            .get(hash)
            .await?
            .ok_or_else(|| PlatformError::ModuleNotFound { hash: hash.clone() })?);
    }
    if let Some(name) = &target.module_name {
        return Ok(state
            .registry
            .get_by_name(name)
            .await?
            .ok_or_else(|| PlatformError::ModuleNotFound { hash: name.clone() })?);
    }
    Err(PlatformError::Validation("必须提供module_hash或module_name".to_string()).into())
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    #[serde(flatten)]
    pub target: ModuleTarget,
    pub data: serde_json::Value,
}

/// POST /api/module/message
///
/// 向在线模块直接下发一条文本帧，模块不在线时返回503。
pub async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<MessageRequest>,
) -> ApiResult<Json<ApiResponse<()>>> {
    let module = resolve_module(&state, &request.target).await?;
    let text = serde_json::to_string(&request.data).map_err(PlatformError::from)?;
    state.sessions.send(&module.module_hash, text).await?;
    Ok(Json(ApiResponse::success_with_message((), "消息已下发")))
}

/// POST /api/module/close
///
/// 管理端主动关闭模块的会话。
pub async fn close_session(
    State(state): State<AppState>,
    Json(request): Json<ModuleTarget>,
) -> ApiResult<Json<ApiResponse<()>>> {
    let module = resolve_module(&state, &request).await?;
    state
        .sessions
        .close(&module.module_hash, CloseReason::Admin)
        .await?;
    tracing::info!(hash = %module.module_hash, "管理端关闭会话: {}", module.name);
    Ok(Json(ApiResponse::success_with_message((), "会话关闭指令已发送")))
}
