use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use platform_core::PlatformError;

use crate::response::ApiResponse;

/// API层错误，负责把平台错误映射为HTTP状态码
#[derive(Debug)]
pub struct ApiError(pub PlatformError);

impl From<PlatformError> for ApiError {
    fn from(e: PlatformError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PlatformError::ModuleNotFound { .. } | PlatformError::WorkflowNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            PlatformError::NotConnected { .. } => StatusCode::SERVICE_UNAVAILABLE,
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("请求处理失败: {}", self.0);
        }
        let body: ApiResponse<()> = ApiResponse::error(self.0.to_string());
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
