use async_trait::async_trait;
use chrono::{DateTime, Utc};

use platform_core::PlatformResult;

use crate::entities::{Module, Workflow};
use crate::messages::FailureNotification;

/// 模块存储接口
#[async_trait]
pub trait ModuleRepository: Send + Sync {
    /// 插入模块，返回分配的module_id；哈希已存在时返回已有记录
    async fn insert(&self, module: Module) -> PlatformResult<Module>;

    async fn get_by_hash(&self, hash: &str) -> PlatformResult<Option<Module>>;

    async fn get_by_name(&self, name: &str) -> PlatformResult<Option<Module>>;

    async fn list(&self) -> PlatformResult<Vec<Module>>;

    /// 绑定会话：置alive并记录session_id和登录时间
    async fn bind_session(
        &self,
        hash: &str,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> PlatformResult<()>;

    /// 解绑会话：仅当当前绑定的就是该session_id时生效，
    /// 避免旧会话的断开回调覆盖新会话
    async fn clear_session(&self, hash: &str, session_id: &str) -> PlatformResult<bool>;

    /// 刷新存活时间（收到Pong时调用）
    async fn touch_alive(&self, hash: &str, at: DateTime<Utc>) -> PlatformResult<()>;

    /// 记录最近一次下发执行指令的时间
    async fn touch_execution(&self, hash: &str, at: DateTime<Utc>) -> PlatformResult<()>;

    /// 将所有模块置为离线（进程启动时调用，清理陈旧状态）
    async fn expire_all(&self) -> PlatformResult<u64>;
}

/// 工作流存储接口
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// 插入工作流，返回分配的workflow_id
    async fn insert(&self, workflow: Workflow) -> PlatformResult<Workflow>;

    async fn get_by_id(&self, id: i64) -> PlatformResult<Option<Workflow>>;

    async fn list(&self) -> PlatformResult<Vec<Workflow>>;

    async fn list_enabled(&self) -> PlatformResult<Vec<Workflow>>;

    /// 启用或停用工作流，返回更新后的记录
    async fn set_enabled(&self, id: i64, enable: bool) -> PlatformResult<Workflow>;
}

/// 失败通知接口
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: FailureNotification);
}
