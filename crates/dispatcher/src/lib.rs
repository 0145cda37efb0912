pub mod cron_utils;
pub mod dispatch;
pub mod job_store;
pub mod pruner;
pub mod reconciler;
pub mod scheduler;

pub use cron_utils::CronScheduler;
pub use dispatch::DispatchEngine;
pub use job_store::JobStore;
pub use pruner::JobPruner;
pub use reconciler::Reconciler;
pub use scheduler::{ReloadSummary, ScheduledJobInfo, TriggerEvent, WorkflowScheduler};
