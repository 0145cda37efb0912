pub mod error;
pub mod handlers;
pub mod response;

use std::sync::Arc;

use axum::routing::{any, get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use platform_dispatcher::{JobStore, WorkflowScheduler};
use platform_domain::repositories::WorkflowRepository;
use platform_gateway::{ConnectionContext, ModuleRegistry, SessionGateway};

use crate::response::ApiResponse;

/// API层共享状态
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ModuleRegistry>,
    pub sessions: Arc<SessionGateway>,
    pub workflows: Arc<dyn WorkflowRepository>,
    pub scheduler: Arc<WorkflowScheduler>,
    pub job_store: Arc<JobStore>,
    pub conn_ctx: ConnectionContext,
}

/// 组装HTTP路由
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/module/register", get(handlers::modules::register))
        .route("/api/module/list", get(handlers::modules::list))
        .route("/api/module/online", get(handlers::modules::online))
        .route("/api/module/message", post(handlers::modules::send_message))
        .route("/api/module/close", post(handlers::modules::close_session))
        .route("/api/workflow/create", post(handlers::workflows::create))
        .route("/api/workflow/list", get(handlers::workflows::list))
        .route("/api/workflow/enable", post(handlers::workflows::set_enabled))
        .route("/api/workflow/execute", post(handlers::workflows::execute))
        .route("/api/scheduler/jobs", get(handlers::scheduler::scheduled_jobs))
        .route("/api/scheduler/executions", get(handlers::scheduler::executions))
        .route("/api/scheduler/reload", post(handlers::scheduler::reload))
        .route("/ws", any(handlers::ws::upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::success("ok"))
}
