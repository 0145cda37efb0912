use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use platform_core::{PlatformError, PlatformResult};

use crate::requirement::NormalizedRequirement;

/// 工作模块实体
///
/// 模块通过注册接口登记后获得身份哈希，之后用该哈希
/// 建立WebSocket会话并接收执行指令。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub module_id: i64,
    pub name: String,
    pub description: String,
    /// 身份哈希：由名称和输入数据需求内容派生，注册幂等的依据
    pub module_hash: String,
    /// 是否存在在线会话
    pub alive: bool,
    /// 当前绑定的会话ID
    pub session_id: Option<String>,
    pub last_alive_time: Option<DateTime<Utc>>,
    pub last_login_time: Option<DateTime<Utc>>,
    pub last_execution_time: Option<DateTime<Utc>>,
    /// 模块声明的输入数据需求
    pub input_data: NormalizedRequirement,
    /// 模块声明的输出数据描述
    pub output_data: NormalizedRequirement,
}

impl Module {
    pub fn new(
        name: String,
        description: String,
        input_data: NormalizedRequirement,
        output_data: NormalizedRequirement,
    ) -> Self {
        let module_hash = Self::compute_hash(&name, &input_data);
        Self {
            module_id: 0,
            name,
            description,
            module_hash,
            alive: false,
            session_id: None,
            last_alive_time: None,
            last_login_time: None,
            last_execution_time: None,
            input_data,
            output_data,
        }
    }

    /// 计算模块身份哈希
    ///
    /// 对名称和规范化后的输入需求做SHA-256。需求字段按名称排序，
    /// 因此声明顺序不同的同一需求会得到相同的哈希。
    pub fn compute_hash(name: &str, input_data: &NormalizedRequirement) -> String {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update(input_data.canonical_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// 时间偏移单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShiftUnit {
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "min")]
    Minutes,
    #[serde(rename = "h")]
    Hours,
    #[serde(rename = "D")]
    Days,
}

/// 执行时间偏移
///
/// 形如 `-30s`、`5min`、`1h`、`2D`，在CRON名义触发时间的
/// 基础上前移或后移实际执行时间。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeShift {
    pub value: i64,
    pub unit: ShiftUnit,
}

impl TimeShift {
    pub fn zero() -> Self {
        Self {
            value: 0,
            unit: ShiftUnit::Seconds,
        }
    }

    /// 解析偏移表达式，空字符串视为零偏移
    pub fn parse(raw: &str) -> PlatformResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Self::zero());
        }
        let digits_end = raw
            .char_indices()
            .take_while(|(i, c)| c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+')))
            .map(|(i, c)| i + c.len_utf8())
            .last()
            .unwrap_or(0);
        let (num, unit) = raw.split_at(digits_end);
        let value: i64 = num
            .parse()
            .map_err(|_| PlatformError::Validation(format!("无法解析时间偏移数值: {raw}")))?;
        let unit = match unit {
            "s" => ShiftUnit::Seconds,
            "min" => ShiftUnit::Minutes,
            "h" => ShiftUnit::Hours,
            "D" => ShiftUnit::Days,
            other => {
                return Err(PlatformError::InvalidTimeShift {
                    unit: other.to_string(),
                })
            }
        };
        Ok(Self { value, unit })
    }

    pub fn to_duration(&self) -> Duration {
        match self.unit {
            ShiftUnit::Seconds => Duration::seconds(self.value),
            ShiftUnit::Minutes => Duration::minutes(self.value),
            ShiftUnit::Hours => Duration::hours(self.value),
            ShiftUnit::Days => Duration::days(self.value),
        }
    }
}

impl std::fmt::Display for TimeShift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let unit = match self.unit {
            ShiftUnit::Seconds => "s",
            ShiftUnit::Minutes => "min",
            ShiftUnit::Hours => "h",
            ShiftUnit::Days => "D",
        };
        write!(f, "{}{}", self.value, unit)
    }
}

/// 工作流中的一个执行条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteModuleEntry {
    pub module_hash: String,
    /// 按模块输入需求组织的执行参数
    pub args: serde_json::Value,
}

/// 工作流实体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: i64,
    pub name: String,
    pub description: String,
    pub enable: bool,
    /// 五段式CRON表达式列表，任一表达式命中即触发
    pub execute_cron_list: Vec<String>,
    pub execute_shift: TimeShift,
    pub execute_modules: Vec<ExecuteModuleEntry>,
}

/// 执行记录状态机
///
/// Pending -> Dispatched -> AwaitingResult -> Succeeded/Failed/TimedOut，
/// 在线下发失败的记录直接进入Failed。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRecordState {
    Pending,
    Dispatched,
    AwaitingResult,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobRecordState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobRecordState::Succeeded | JobRecordState::Failed | JobRecordState::TimedOut
        )
    }

    /// 校验状态转换是否合法
    pub fn can_transition_to(&self, next: JobRecordState) -> bool {
        use JobRecordState::*;
        matches!(
            (self, next),
            (Pending, Dispatched)
                | (Pending, Failed)
                | (Dispatched, AwaitingResult)
                | (Dispatched, Failed)
                | (AwaitingResult, Succeeded)
                | (AwaitingResult, Failed)
                | (AwaitingResult, TimedOut)
        )
    }
}

/// 单个模块在一次触发中的执行记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub module_hash: String,
    pub module_name: String,
    pub state: JobRecordState,
    pub dispatched_at: Option<DateTime<Utc>>,
    /// 等待结果的截止时间，超过后由超时检查置为TimedOut
    pub deadline: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub detail: Option<String>,
}

impl JobRecord {
    pub fn new(module_hash: String, module_name: String) -> Self {
        Self {
            module_hash,
            module_name,
            state: JobRecordState::Pending,
            dispatched_at: None,
            deadline: None,
            finished_at: None,
            detail: None,
        }
    }

    /// 更新状态并打上相应的时间戳，非法转换返回false
    pub fn update_state(&mut self, next: JobRecordState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        let now = Utc::now();
        match next {
            JobRecordState::Dispatched => self.dispatched_at = Some(now),
            s if s.is_terminal() => self.finished_at = Some(now),
            _ => {}
        }
        self.state = next;
        true
    }
}

/// 一次工作流触发产生的执行单
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub workflow_id: i64,
    pub workflow_name: String,
    /// 名义触发时间（未应用偏移）
    pub trigger_time: DateTime<Utc>,
    pub records: Vec<JobRecord>,
    /// 全部记录进入终态的时刻
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(workflow_id: i64, workflow_name: String, trigger_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            workflow_name,
            trigger_time,
            records: Vec::new(),
            finalized_at: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        !self.records.is_empty() && self.records.iter().all(|r| r.state.is_terminal())
    }
}
