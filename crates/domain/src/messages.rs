use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 执行指令的元信息，随指令一并下发给模块
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecuteMeta {
    /// 实际执行时间（已应用工作流的时间偏移）
    pub execution_time: DateTime<Utc>,
    pub workflow_id: i64,
    pub workflow_name: String,
}

/// 模块上报的执行结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    /// 兼容模块侧上报的多种失败写法
    #[serde(alias = "failed", alias = "error")]
    Failure,
}

/// 模块上报的结果帧内容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultFrame {
    pub status: ResultStatus,
    pub workflow_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResultFrame {
    /// 失败描述：优先error字段，其次message
    pub fn failure_detail(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "模块未提供失败原因".to_string())
    }
}

/// 会话双向消息帧
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// 平台下发的执行指令
    Execute {
        meta: ExecuteMeta,
        args: serde_json::Value,
    },
    /// 模块上报的执行结果
    Result(ResultFrame),
}

/// 失败原因分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// 目标模块已注册但不在线
    ModuleOffline,
    /// 目标模块哈希不存在
    ModuleNotFound,
    /// 模块上报执行失败
    ExecutionFailed,
    /// 等待执行结果超时
    ExecutionTimedOut,
}

/// 工作流执行失败通知
///
/// 交给外部通知渠道的载荷，每条终态失败记录至多产生一条。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureNotification {
    pub workflow_id: i64,
    pub workflow_name: String,
    pub module_hash: String,
    pub module_name: Option<String>,
    pub reason: FailureReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl FailureNotification {
    fn new(
        workflow_id: i64,
        workflow_name: String,
        module_hash: String,
        module_name: Option<String>,
        reason: FailureReason,
        detail: Option<String>,
    ) -> Self {
        Self {
            workflow_id,
            workflow_name,
            module_hash,
            module_name,
            reason,
            detail,
            occurred_at: Utc::now(),
        }
    }

    pub fn module_offline(
        workflow_id: i64,
        workflow_name: String,
        module_hash: String,
        module_name: String,
    ) -> Self {
        Self::new(
            workflow_id,
            workflow_name,
            module_hash,
            Some(module_name),
            FailureReason::ModuleOffline,
            None,
        )
    }

    pub fn module_not_found(workflow_id: i64, workflow_name: String, module_hash: String) -> Self {
        Self::new(
            workflow_id,
            workflow_name,
            module_hash,
            None,
            FailureReason::ModuleNotFound,
            None,
        )
    }

    pub fn execution_failed(
        workflow_id: i64,
        workflow_name: String,
        module_hash: String,
        module_name: String,
        detail: String,
    ) -> Self {
        Self::new(
            workflow_id,
            workflow_name,
            module_hash,
            Some(module_name),
            FailureReason::ExecutionFailed,
            Some(detail),
        )
    }

    pub fn execution_timed_out(
        workflow_id: i64,
        workflow_name: String,
        module_hash: String,
        module_name: String,
    ) -> Self {
        Self::new(
            workflow_id,
            workflow_name,
            module_hash,
            Some(module_name),
            FailureReason::ExecutionTimedOut,
            None,
        )
    }

    pub fn summary(&self) -> String {
        let module = self.module_name.as_deref().unwrap_or(&self.module_hash);
        match self.reason {
            FailureReason::ModuleOffline => {
                format!("工作流 {} 执行失败: 模块 {} 不在线", self.workflow_name, module)
            }
            FailureReason::ModuleNotFound => {
                format!("工作流 {} 执行失败: 模块 {} 不存在", self.workflow_name, module)
            }
            FailureReason::ExecutionFailed => format!(
                "工作流 {} 模块 {} 执行失败: {}",
                self.workflow_name,
                module,
                self.detail.as_deref().unwrap_or("原因未知")
            ),
            FailureReason::ExecutionTimedOut => {
                format!("工作流 {} 模块 {} 等待结果超时", self.workflow_name, module)
            }
        }
    }
}
