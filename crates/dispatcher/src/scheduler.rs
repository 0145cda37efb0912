use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};

use platform_core::{PlatformError, PlatformResult};
use platform_domain::entities::Workflow;
use platform_domain::repositories::WorkflowRepository;

use crate::cron_utils::CronScheduler;

/// 一次工作流触发
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerEvent {
    pub workflow_id: i64,
    /// 名义触发时间（CRON命中的时刻）
    pub fire_time: DateTime<Utc>,
    /// 实际执行时间（已应用偏移）
    pub execution_time: DateTime<Utc>,
    /// 是否为手动触发
    pub manual: bool,
}

/// 重载后的调度表摘要
#[derive(Debug, Clone, Serialize)]
pub struct ReloadSummary {
    /// 本次重载移除的调度条目数
    pub removed_count: usize,
    /// 重载后的调度条目总数
    pub current_count: usize,
    /// 当前启用的工作流名称列表
    pub enabled_workflows: Vec<String>,
}

/// 调度表条目的对外视图
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledJobInfo {
    pub workflow_id: i64,
    pub workflow_name: String,
    pub cron_list: Vec<String>,
    pub shift: String,
    pub next_fire_time: Option<DateTime<Utc>>,
}

struct ScheduleEntry {
    workflow_name: String,
    cron: CronScheduler,
    cron_list: Vec<String>,
    shift: chrono::Duration,
    shift_display: String,
}

/// 工作流调度器
///
/// 持有启用工作流的调度表，按固定tick扫描；一个tick内同一
/// 工作流命中多个时刻时合并为一次触发，只保留最新的时刻。
pub struct WorkflowScheduler {
    workflows: Arc<dyn WorkflowRepository>,
    entries: RwLock<HashMap<i64, ScheduleEntry>>,
    trigger_tx: mpsc::Sender<TriggerEvent>,
    last_tick: Mutex<DateTime<Utc>>,
    tick_interval: Duration,
}

impl WorkflowScheduler {
    pub fn new(
        workflows: Arc<dyn WorkflowRepository>,
        tick_interval: Duration,
    ) -> (Self, mpsc::Receiver<TriggerEvent>) {
        let (trigger_tx, trigger_rx) = mpsc::channel(256);
        (
            Self {
                workflows,
                entries: RwLock::new(HashMap::new()),
                trigger_tx,
                last_tick: Mutex::new(Utc::now()),
                tick_interval,
            },
            trigger_rx,
        )
    }

    fn build_entry(workflow: &Workflow) -> PlatformResult<ScheduleEntry> {
        let cron = CronScheduler::new(&workflow.execute_cron_list)?;
        Ok(ScheduleEntry {
            workflow_name: workflow.name.clone(),
            cron,
            cron_list: workflow.execute_cron_list.clone(),
            shift: workflow.execute_shift.to_duration(),
            shift_display: workflow.execute_shift.to_string(),
        })
    }

    /// 从存储重建调度表，返回变更摘要
    ///
    /// 启用状态变化、创建工作流之后都应调用；表达式非法的
    /// 工作流跳过并记日志，不影响其余条目。
    pub async fn reload(&self) -> PlatformResult<ReloadSummary> {
        let enabled = self.workflows.list_enabled().await?;
        let mut next = HashMap::new();
        let mut enabled_names = Vec::new();
        for workflow in &enabled {
            match Self::build_entry(workflow) {
                Ok(entry) => {
                    enabled_names.push(workflow.name.clone());
                    next.insert(workflow.workflow_id, entry);
                }
                Err(e) => {
                    tracing::error!(
                        workflow_id = workflow.workflow_id,
                        "工作流 {} 的调度表达式非法，跳过: {}",
                        workflow.name,
                        e
                    );
                }
            }
        }

        let mut entries = self.entries.write().await;
        let removed_count = entries
            .keys()
            .filter(|id| !next.contains_key(id))
            .count();
        let current_count = next.len();
        *entries = next;
        tracing::info!(
            removed = removed_count,
            current = current_count,
            "调度表已重载"
        );
        Ok(ReloadSummary {
            removed_count,
            current_count,
            enabled_workflows: enabled_names,
        })
    }

    /// 单个tick：扫描所有条目，发出窗口内命中的触发
    ///
    /// 判定在偏移后的时间线上进行：名义时刻t的实际执行时刻是
    /// t+shift，落在 `(last_tick, now]` 内即触发。
    pub async fn tick(&self, now: DateTime<Utc>) -> PlatformResult<usize> {
        let last = {
            let mut last_tick = self.last_tick.lock().await;
            let prev = *last_tick;
            *last_tick = now;
            prev
        };
        if now <= last {
            return Ok(0);
        }

        // 持锁只做命中判定，发送在放锁之后；触发通道写满时
        // 不能卡住调度表的重载
        let due: Vec<TriggerEvent> = {
            let entries = self.entries.read().await;
            let mut due = Vec::new();
            for (workflow_id, entry) in entries.iter() {
                let fires = entry
                    .cron
                    .fires_between(last - entry.shift, now - entry.shift);
                // 合并同一窗口内的多次命中，只执行最近一次
                let Some(fire_time) = fires.last().copied() else {
                    continue;
                };
                if fires.len() > 1 {
                    tracing::warn!(
                        workflow_id = *workflow_id,
                        "工作流 {} 在本窗口命中 {} 次，合并为一次触发",
                        entry.workflow_name,
                        fires.len()
                    );
                }
                due.push(TriggerEvent {
                    workflow_id: *workflow_id,
                    fire_time,
                    execution_time: fire_time + entry.shift,
                    manual: false,
                });
            }
            due
        };

        let fired = due.len();
        for event in due {
            if self.trigger_tx.send(event).await.is_err() {
                return Err(PlatformError::Internal(
                    "触发事件通道已关闭".to_string(),
                ));
            }
        }
        Ok(fired)
    }

    /// 手动触发一个工作流，立即执行，不应用偏移
    pub async fn trigger_now(&self, workflow_id: i64) -> PlatformResult<()> {
        let workflow = self
            .workflows
            .get_by_id(workflow_id)
            .await?
            .ok_or(PlatformError::WorkflowNotFound { id: workflow_id })?;
        let now = Utc::now();
        tracing::info!(workflow_id, "手动触发工作流: {}", workflow.name);
        self.trigger_tx
            .send(TriggerEvent {
                workflow_id,
                fire_time: now,
                execution_time: now,
                manual: true,
            })
            .await
            .map_err(|_| PlatformError::Internal("触发事件通道已关闭".to_string()))
    }

    /// 调度表快照，含每个条目的下次名义触发时刻
    pub async fn scheduled_jobs(&self) -> Vec<ScheduledJobInfo> {
        let now = Utc::now();
        let entries = self.entries.read().await;
        let mut jobs: Vec<ScheduledJobInfo> = entries
            .iter()
            .map(|(id, entry)| ScheduledJobInfo {
                workflow_id: *id,
                workflow_name: entry.workflow_name.clone(),
                cron_list: entry.cron_list.clone(),
                shift: entry.shift_display.clone(),
                next_fire_time: entry.cron.next_after(now),
            })
            .collect();
        jobs.sort_by_key(|j| j.workflow_id);
        jobs
    }

    /// 调度主循环，直到停止信号
    pub async fn run(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        *self.last_tick.lock().await = Utc::now();
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!("调度循环启动, tick间隔 {:?}", self.tick_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        tracing::error!("调度tick失败: {}", e);
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("调度循环收到停止信号");
                    break;
                }
            }
        }
    }
}
