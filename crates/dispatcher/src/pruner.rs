use std::sync::Arc;

use chrono::{Duration, Utc};

use platform_core::PlatformResult;

use crate::cron_utils::CronScheduler;
use crate::job_store::JobStore;

/// 每周一零点清理过期的终态执行单
pub struct JobPruner {
    job_store: Arc<JobStore>,
    retention: Duration,
    schedule: CronScheduler,
}

impl JobPruner {
    pub fn new(job_store: Arc<JobStore>, retention_seconds: i64) -> PlatformResult<Self> {
        Ok(Self {
            job_store,
            retention: Duration::seconds(retention_seconds),
            schedule: CronScheduler::new(&["0 0 * * 1".to_string()])?,
        })
    }

    /// 执行一次清理，返回删除数量
    pub async fn prune_once(&self) -> usize {
        let cutoff = Utc::now() - self.retention;
        let removed = self.job_store.prune_finalized(cutoff).await;
        tracing::info!(removed, "执行单清理完成");
        removed
    }

    /// 清理循环：睡到下一个周一零点，醒来清理一次
    pub async fn run(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        tracing::info!("执行单清理循环启动");
        loop {
            let Some(next) = self.schedule.next_after(Utc::now()) else {
                tracing::error!("无法计算下一次清理时间，清理循环退出");
                return;
            };
            let wait = (next - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(1));
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    self.prune_once().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("清理循环收到停止信号");
                    break;
                }
            }
        }
    }
}
