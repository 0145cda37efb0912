use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use platform_core::PlatformError;
use platform_dispatcher::cron_utils;
use platform_dispatcher::ReloadSummary;
use platform_domain::entities::{ExecuteModuleEntry, TimeShift, Workflow};

use crate::error::ApiResult;
use crate::handlers::modules::{resolve_module, ModuleTarget};
use crate::response::ApiResponse;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateModuleEntry {
    #[serde(flatten)]
    pub target: ModuleTarget,
    #[serde(default)]
    pub args: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enable")]
    pub enable: bool,
    pub execute_cron_list: Vec<String>,
    #[serde(default)]
    pub execute_shift: Option<String>,
    pub execute_modules: Vec<CreateModuleEntry>,
}

fn default_enable() -> bool {
    true
}

/// POST /api/workflow/create
///
/// 创建时做全量校验：CRON表达式、时间偏移、目标模块存在性
/// 以及执行参数是否满足各模块声明的输入需求。
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateWorkflowRequest>,
) -> ApiResult<Json<ApiResponse<Workflow>>> {
    if request.name.trim().is_empty() {
        return Err(PlatformError::Validation("工作流名称不能为空".to_string()).into());
    }
    if request.execute_cron_list.is_empty() {
        return Err(PlatformError::Validation("CRON表达式列表不能为空".to_string()).into());
    }
    for expr in &request.execute_cron_list {
        cron_utils::validate(expr)?;
    }
    let shift = match &request.execute_shift {
        Some(raw) => TimeShift::parse(raw)?,
        None => TimeShift::zero(),
    };
    if request.execute_modules.is_empty() {
        return Err(PlatformError::Validation("至少需要一个执行模块".to_string()).into());
    }

    let mut entries = Vec::with_capacity(request.execute_modules.len());
    for entry in &request.execute_modules {
        let module = resolve_module(&state, &entry.target).await?;
        let args = entry.args.clone().unwrap_or_else(|| serde_json::json!({}));
        let check = module.input_data.check(&args);
        if !check.is_ok() {
            return Err(PlatformError::Validation(format!(
                "模块 {} 的执行参数不满足输入需求: {}",
                module.name,
                check.describe()
            ))
            .into());
        }
        entries.push(ExecuteModuleEntry {
            module_hash: module.module_hash,
            args,
        });
    }

    let workflow = state
        .workflows
        .insert(Workflow {
            workflow_id: 0,
            name: request.name.trim().to_string(),
            description: request.description,
            enable: request.enable,
            execute_cron_list: request.execute_cron_list,
            execute_shift: shift,
            execute_modules: entries,
        })
        .await?;
    tracing::info!(workflow_id = workflow.workflow_id, "创建工作流: {}", workflow.name);
    if workflow.enable {
        state.scheduler.reload().await?;
    }
    Ok(Json(ApiResponse::success(workflow)))
}

/// GET /api/workflow/list
pub async fn list(State(state): State<AppState>) -> ApiResult<Json<ApiResponse<Vec<Workflow>>>> {
    let workflows = state.workflows.list().await?;
    Ok(Json(ApiResponse::success(workflows)))
}

#[derive(Debug, Deserialize)]
pub struct SetEnabledRequest {
    pub workflow_id: i64,
    pub enable: bool,
}

#[derive(Debug, Serialize)]
pub struct SetEnabledResponse {
    pub workflow: Workflow,
    pub reload: ReloadSummary,
}

/// POST /api/workflow/enable
///
/// 切换启用状态并立即重载调度表，响应携带重载摘要。
pub async fn set_enabled(
    State(state): State<AppState>,
    Json(request): Json<SetEnabledRequest>,
) -> ApiResult<Json<ApiResponse<SetEnabledResponse>>> {
    let workflow = state
        .workflows
        .set_enabled(request.workflow_id, request.enable)
        .await?;
    let reload = state.scheduler.reload().await?;
    tracing::info!(
        workflow_id = workflow.workflow_id,
        enable = request.enable,
        "工作流启用状态变更: {}",
        workflow.name
    );
    Ok(Json(ApiResponse::success(SetEnabledResponse {
        workflow,
        reload,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub workflow_id: i64,
}

/// POST /api/workflow/execute
///
/// 手动触发一次，立即执行，不应用时间偏移。
pub async fn execute(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> ApiResult<Json<ApiResponse<()>>> {
    state.scheduler.trigger_now(request.workflow_id).await?;
    Ok(Json(ApiResponse::success_with_message((), "已触发执行")))
}
