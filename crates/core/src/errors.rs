use thiserror::Error;

/// 平台统一错误类型定义
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("数据校验失败: {0}")]
    Validation(String),

    #[error("模块未找到: {hash}")]
    ModuleNotFound { hash: String },

    #[error("工作流未找到: {id}")]
    WorkflowNotFound { id: i64 },

    #[error("模块 {hash} 当前没有在线会话")]
    NotConnected { hash: String },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("不支持的时间偏移单位: {unit}")]
    InvalidTimeShift { unit: String },

    #[error("无法解析的会话帧: {0}")]
    MalformedFrame(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl PlatformError {
    /// 是否属于调用方传入数据的问题（而非系统故障）
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PlatformError::Validation(_)
                | PlatformError::InvalidCron { .. }
                | PlatformError::InvalidTimeShift { .. }
                | PlatformError::MalformedFrame(_)
        )
    }
}

/// 统一的Result类型
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;
