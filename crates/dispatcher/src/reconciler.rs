use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use platform_domain::entities::JobRecordState;
use platform_domain::messages::{FailureNotification, ResultFrame, ResultStatus};
use platform_domain::repositories::Notifier;
use platform_gateway::GatewayEvent;

use crate::job_store::JobStore;

/// 执行结果归账器
///
/// 消费网关上报的结果帧，匹配执行单中等待的记录；匹配不上
/// 的上报只记日志后丢弃。同时承担等待超时的周期检查。
pub struct Reconciler {
    job_store: Arc<JobStore>,
    notifier: Arc<dyn Notifier>,
}

impl Reconciler {
    pub fn new(job_store: Arc<JobStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            job_store,
            notifier,
        }
    }

    /// 归账一条结果上报
    pub async fn handle_result(&self, module_hash: &str, frame: ResultFrame) {
        let success = frame.status == ResultStatus::Success;
        let detail = if success {
            frame.message.clone()
        } else {
            Some(frame.failure_detail())
        };
        let completed = self
            .job_store
            .complete(frame.workflow_id, module_hash, success, detail)
            .await;
        let Some(completed) = completed else {
            tracing::warn!(
                hash = %module_hash,
                workflow_id = frame.workflow_id,
                "结果上报没有匹配的等待记录，丢弃"
            );
            return;
        };
        match completed.state {
            JobRecordState::Succeeded => {
                tracing::info!(
                    workflow_id = completed.workflow_id,
                    hash = %completed.module_hash,
                    "模块 {} 执行成功",
                    completed.module_name
                );
            }
            JobRecordState::Failed => {
                self.notifier
                    .notify(FailureNotification::execution_failed(
                        completed.workflow_id,
                        completed.workflow_name,
                        completed.module_hash,
                        completed.module_name,
                        frame.failure_detail(),
                    ))
                    .await;
            }
            _ => {}
        }
    }

    /// 把截止时间已过的等待记录置为超时并逐条发出通知
    pub async fn sweep_timeouts(&self, now: DateTime<Utc>) -> usize {
        let timed_out = self.job_store.collect_timeouts(now).await;
        for record in &timed_out {
            tracing::warn!(
                workflow_id = record.workflow_id,
                hash = %record.module_hash,
                "模块 {} 等待执行结果超时",
                record.module_name
            );
            self.notifier
                .notify(FailureNotification::execution_timed_out(
                    record.workflow_id,
                    record.workflow_name.clone(),
                    record.module_hash.clone(),
                    record.module_name.clone(),
                ))
                .await;
        }
        timed_out.len()
    }

    /// 结果归账主循环
    pub async fn run(
        &self,
        mut event_rx: mpsc::Receiver<GatewayEvent>,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) {
        tracing::info!("结果归账循环启动");
        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        Some(GatewayEvent::Result { module_hash, frame }) => {
                            self.handle_result(&module_hash, frame).await;
                        }
                        None => {
                            tracing::info!("网关事件通道已关闭，归账循环退出");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("归账循环收到停止信号");
                    break;
                }
            }
        }
    }

    /// 超时检查循环
    pub async fn run_timeout_sweep(
        &self,
        interval: Duration,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!("超时检查循环启动, 间隔 {:?}", interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let count = self.sweep_timeouts(Utc::now()).await;
                    if count > 0 {
                        tracing::warn!("本轮超时检查命中 {} 条记录", count);
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("超时检查循环收到停止信号");
                    break;
                }
            }
        }
    }
}
