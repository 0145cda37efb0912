use axum::extract::State;
use axum::Json;

use platform_dispatcher::{ReloadSummary, ScheduledJobInfo};
use platform_domain::entities::Job;

use crate::error::ApiResult;
use crate::response::ApiResponse;
use crate::AppState;

/// GET /api/scheduler/jobs
///
/// 当前调度表快照，含每个条目的下次名义触发时刻。
pub async fn scheduled_jobs(
    State(state): State<AppState>,
) -> ApiResult<Json<ApiResponse<Vec<ScheduledJobInfo>>>> {
    let jobs = state.scheduler.scheduled_jobs().await;
    Ok(Json(ApiResponse::success(jobs)))
}

/// GET /api/scheduler/executions
///
/// 执行单快照，含各记录的状态与时间戳。
pub async fn executions(
    State(state): State<AppState>,
) -> ApiResult<Json<ApiResponse<Vec<Job>>>> {
    let jobs = state.job_store.snapshot().await;
    Ok(Json(ApiResponse::success(jobs)))
}

/// POST /api/scheduler/reload
pub async fn reload(
    State(state): State<AppState>,
) -> ApiResult<Json<ApiResponse<ReloadSummary>>> {
    let summary = state.scheduler.reload().await?;
    Ok(Json(ApiResponse::success(summary)))
}
