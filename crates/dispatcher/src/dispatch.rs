use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;

use platform_core::{PlatformError, PlatformResult};
use platform_domain::entities::{Job, JobRecord, JobRecordState};
use platform_domain::messages::{ExecuteMeta, FailureNotification, Frame};
use platform_domain::repositories::{Notifier, WorkflowRepository};
use platform_gateway::{ModuleRegistry, SessionGateway};

use crate::job_store::JobStore;
use crate::scheduler::TriggerEvent;

/// 已建立执行记录、等待发往模块会话的指令帧
struct PendingFrame {
    module_hash: String,
    module_name: String,
    text: String,
}

/// 触发事件的下发引擎
///
/// 消费调度器发出的触发事件，先为全部目标模块建立执行单
/// 记录并入库，再逐个下发执行指令；模块不存在或不在线时
/// 记录立即失败并发出通知，不重试不入队。
pub struct DispatchEngine {
    workflows: Arc<dyn WorkflowRepository>,
    registry: Arc<ModuleRegistry>,
    sessions: Arc<SessionGateway>,
    job_store: Arc<JobStore>,
    notifier: Arc<dyn Notifier>,
    execution_timeout: chrono::Duration,
}

impl DispatchEngine {
    pub fn new(
        workflows: Arc<dyn WorkflowRepository>,
        registry: Arc<ModuleRegistry>,
        sessions: Arc<SessionGateway>,
        job_store: Arc<JobStore>,
        notifier: Arc<dyn Notifier>,
        execution_timeout: chrono::Duration,
    ) -> Self {
        Self {
            workflows,
            registry,
            sessions,
            job_store,
            notifier,
            execution_timeout,
        }
    }

    /// 处理一次工作流触发
    pub async fn handle_trigger(&self, event: TriggerEvent) -> PlatformResult<()> {
        let Some(workflow) = self.workflows.get_by_id(event.workflow_id).await? else {
            tracing::warn!(
                workflow_id = event.workflow_id,
                "触发的工作流已不存在，忽略"
            );
            return Ok(());
        };
        // 调度表重载与触发之间可能有竞争，再确认一次启用状态
        if !workflow.enable && !event.manual {
            tracing::debug!(workflow_id = workflow.workflow_id, "工作流已停用，忽略触发");
            return Ok(());
        }

        tracing::info!(
            workflow_id = workflow.workflow_id,
            fire_time = %event.fire_time,
            manual = event.manual,
            "下发工作流: {}",
            workflow.name
        );

        // 先建好全部记录并入库，再下发指令；模块秒回的结果
        // 才能总是匹配到等待中的记录
        let mut job = Job::new(workflow.workflow_id, workflow.name.clone(), event.fire_time);
        let mut outbound = Vec::new();
        for entry in &workflow.execute_modules {
            let (record, frame) = self
                .prepare_entry(&workflow.name, workflow.workflow_id, &event, entry)
                .await;
            if let Some(pending) = frame {
                outbound.push((job.records.len(), pending));
            }
            job.records.push(record);
        }
        if job.is_finalized() {
            job.finalized_at = Some(Utc::now());
        }
        let job_id = job.id;
        self.job_store.insert(job).await;

        for (record_idx, pending) in outbound {
            self.send_entry(&workflow.name, workflow.workflow_id, job_id, record_idx, pending)
                .await;
        }
        Ok(())
    }

    /// 为一个目标模块建立执行记录，模块存在时同时准备好待发帧
    async fn prepare_entry(
        &self,
        workflow_name: &str,
        workflow_id: i64,
        event: &TriggerEvent,
        entry: &platform_domain::entities::ExecuteModuleEntry,
    ) -> (JobRecord, Option<PendingFrame>) {
        let module = match self.registry.get(&entry.module_hash).await {
            Ok(module) => module,
            Err(e) => {
                tracing::error!(hash = %entry.module_hash, "查询模块失败: {}", e);
                None
            }
        };
        let Some(module) = module else {
            let mut record =
                JobRecord::new(entry.module_hash.clone(), String::new());
            record.update_state(JobRecordState::Failed);
            record.detail = Some("模块不存在".to_string());
            self.notifier
                .notify(FailureNotification::module_not_found(
                    workflow_id,
                    workflow_name.to_string(),
                    entry.module_hash.clone(),
                ))
                .await;
            return (record, None);
        };

        let mut record = JobRecord::new(module.module_hash.clone(), module.name.clone());
        let frame = Frame::Execute {
            meta: ExecuteMeta {
                execution_time: event.execution_time,
                workflow_id,
                workflow_name: workflow_name.to_string(),
            },
            args: entry.args.clone(),
        };
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                record.update_state(JobRecordState::Failed);
                record.detail = Some(format!("序列化执行指令失败: {e}"));
                return (record, None);
            }
        };

        record.update_state(JobRecordState::Dispatched);
        record.update_state(JobRecordState::AwaitingResult);
        record.deadline = Some(Utc::now() + self.execution_timeout);
        let pending = PendingFrame {
            module_hash: module.module_hash,
            module_name: module.name,
            text,
        };
        (record, Some(pending))
    }

    /// 把已入库记录对应的执行指令帧发往模块会话
    ///
    /// 下发失败时通过执行单存储把记录置为失败，保证和同时
    /// 到达的结果上报或超时检查之间的状态转换互斥。
    async fn send_entry(
        &self,
        workflow_name: &str,
        workflow_id: i64,
        job_id: uuid::Uuid,
        record_idx: usize,
        pending: PendingFrame,
    ) {
        match self.sessions.send(&pending.module_hash, pending.text).await {
            Ok(()) => {
                if let Err(e) = self.registry.mark_executed(&pending.module_hash).await {
                    tracing::warn!(hash = %pending.module_hash, "记录执行时间失败: {}", e);
                }
            }
            Err(PlatformError::NotConnected { .. }) => {
                tracing::warn!(
                    workflow_id,
                    hash = %pending.module_hash,
                    "模块 {} 不在线，下发失败",
                    pending.module_name
                );
                self.job_store
                    .fail_record(job_id, record_idx, "模块不在线".to_string())
                    .await;
                self.notifier
                    .notify(FailureNotification::module_offline(
                        workflow_id,
                        workflow_name.to_string(),
                        pending.module_hash,
                        pending.module_name,
                    ))
                    .await;
            }
            Err(e) => {
                tracing::error!(hash = %pending.module_hash, "下发执行指令失败: {}", e);
                self.job_store
                    .fail_record(job_id, record_idx, e.to_string())
                    .await;
                self.notifier
                    .notify(FailureNotification::execution_failed(
                        workflow_id,
                        workflow_name.to_string(),
                        pending.module_hash,
                        pending.module_name,
                        e.to_string(),
                    ))
                    .await;
            }
        }
    }

    /// 下发主循环，消费触发事件直到通道关闭或停止信号
    pub async fn run(
        &self,
        mut trigger_rx: mpsc::Receiver<TriggerEvent>,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) {
        tracing::info!("下发引擎启动");
        loop {
            tokio::select! {
                event = trigger_rx.recv() => {
                    match event {
                        Some(event) => {
                            if let Err(e) = self.handle_trigger(event).await {
                                tracing::error!("处理触发事件失败: {}", e);
                            }
                        }
                        None => {
                            tracing::info!("触发事件通道已关闭，下发引擎退出");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("下发引擎收到停止信号");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform_domain::entities::{ExecuteModuleEntry, TimeShift, Workflow};
    use platform_gateway::SessionHandle;
    use platform_infrastructure::{
        InMemoryModuleRepository, InMemoryWorkflowRepository, RecordingNotifier,
    };
    use serde_json::json;

    struct Fixture {
        workflows: Arc<InMemoryWorkflowRepository>,
        registry: Arc<ModuleRegistry>,
        sessions: Arc<SessionGateway>,
        job_store: Arc<JobStore>,
        notifier: Arc<RecordingNotifier>,
        engine: Arc<DispatchEngine>,
    }

    fn fixture() -> Fixture {
        let workflows = Arc::new(InMemoryWorkflowRepository::new());
        let registry = Arc::new(ModuleRegistry::new(Arc::new(
            InMemoryModuleRepository::new(),
        )));
        let (sessions, _events) = SessionGateway::new(16);
        let sessions = Arc::new(sessions);
        let job_store = Arc::new(JobStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = Arc::new(DispatchEngine::new(
            workflows.clone(),
            registry.clone(),
            sessions.clone(),
            job_store.clone(),
            notifier.clone(),
            chrono::Duration::seconds(120),
        ));
        Fixture {
            workflows,
            registry,
            sessions,
            job_store,
            notifier,
            engine,
        }
    }

    async fn insert_workflow(fx: &Fixture, module_hash: &str) -> Workflow {
        fx.workflows
            .insert(Workflow {
                workflow_id: 0,
                name: "采集".to_string(),
                description: String::new(),
                enable: true,
                execute_cron_list: vec!["0 10 * * *".to_string()],
                execute_shift: TimeShift::zero(),
                execute_modules: vec![ExecuteModuleEntry {
                    module_hash: module_hash.to_string(),
                    args: json!({"city": "beijing"}),
                }],
            })
            .await
            .unwrap()
    }

    fn trigger(workflow_id: i64) -> TriggerEvent {
        let now = Utc::now();
        TriggerEvent {
            workflow_id,
            fire_time: now,
            execution_time: now,
            manual: false,
        }
    }

    #[tokio::test]
    async fn test_dispatch_to_online_module() {
        let fx = fixture();
        let module = fx
            .registry
            .register("weather", "", &json!({"city": "string"}), &json!({}))
            .await
            .unwrap();
        let (out_tx, mut out_rx) = tokio::sync::mpsc::channel(4);
        let (close_tx, _close_rx) = tokio::sync::mpsc::channel(1);
        fx.sessions
            .bind(
                &module.module_hash,
                SessionHandle {
                    session_id: "s1".to_string(),
                    outbound: out_tx,
                    close: close_tx,
                },
            )
            .await;
        let wf = insert_workflow(&fx, &module.module_hash).await;

        fx.engine.handle_trigger(trigger(wf.workflow_id)).await.unwrap();

        // 模块收到执行指令帧
        let text = out_rx.recv().await.unwrap();
        let frame: Frame = serde_json::from_str(&text).unwrap();
        match frame {
            Frame::Execute { meta, args } => {
                assert_eq!(meta.workflow_id, wf.workflow_id);
                assert_eq!(args["city"], "beijing");
            }
            _ => panic!("应当是执行指令帧"),
        }
        // 记录进入等待结果状态并带截止时间
        let jobs = fx.job_store.snapshot().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].records[0].state, JobRecordState::AwaitingResult);
        assert!(jobs[0].records[0].deadline.is_some());
        assert_eq!(fx.notifier.count().await, 0);
        // 下发时间已记录
        let module = fx.registry.get(&module.module_hash).await.unwrap().unwrap();
        assert!(module.last_execution_time.is_some());
    }

    #[tokio::test]
    async fn test_dispatch_to_offline_module_fails_and_notifies() {
        let fx = fixture();
        let module = fx
            .registry
            .register("weather", "", &json!({"city": "string"}), &json!({}))
            .await
            .unwrap();
        let wf = insert_workflow(&fx, &module.module_hash).await;

        fx.engine.handle_trigger(trigger(wf.workflow_id)).await.unwrap();

        let jobs = fx.job_store.snapshot().await;
        assert_eq!(jobs[0].records[0].state, JobRecordState::Failed);
        assert!(jobs[0].finalized_at.is_some());
        let notifications = fx.notifier.take().await;
        assert_eq!(notifications.len(), 1);
        assert_eq!(
            notifications[0].reason,
            platform_domain::messages::FailureReason::ModuleOffline
        );
    }

    #[tokio::test]
    async fn test_dispatch_to_unknown_module_notifies_not_found() {
        let fx = fixture();
        let wf = insert_workflow(&fx, "deadbeef").await;

        fx.engine.handle_trigger(trigger(wf.workflow_id)).await.unwrap();

        let jobs = fx.job_store.snapshot().await;
        assert_eq!(jobs[0].records[0].state, JobRecordState::Failed);
        let notifications = fx.notifier.take().await;
        assert_eq!(
            notifications[0].reason,
            platform_domain::messages::FailureReason::ModuleNotFound
        );
        assert_eq!(notifications[0].module_hash, "deadbeef");
    }

    #[tokio::test]
    async fn test_result_can_match_as_soon_as_frame_is_sent() {
        let fx = fixture();
        let module = fx
            .registry
            .register("weather", "", &json!({"city": "string"}), &json!({}))
            .await
            .unwrap();
        let (out_tx, mut out_rx) = tokio::sync::mpsc::channel(4);
        let (close_tx, _close_rx) = tokio::sync::mpsc::channel(1);
        fx.sessions
            .bind(
                &module.module_hash,
                SessionHandle {
                    session_id: "s1".to_string(),
                    outbound: out_tx,
                    close: close_tx,
                },
            )
            .await;
        let wf = insert_workflow(&fx, &module.module_hash).await;

        let engine = fx.engine.clone();
        let workflow_id = wf.workflow_id;
        let dispatching =
            tokio::spawn(async move { engine.handle_trigger(trigger(workflow_id)).await });

        // 指令帧一旦送达会话，执行单必然已经入库，秒回的结果
        // 立即可归账，不会被当作无主上报丢弃
        let _ = out_rx.recv().await.unwrap();
        let completed = fx
            .job_store
            .complete(wf.workflow_id, &module.module_hash, true, None)
            .await;
        assert!(completed.is_some());
        dispatching.await.unwrap().unwrap();

        let jobs = fx.job_store.snapshot().await;
        assert_eq!(jobs[0].records[0].state, JobRecordState::Succeeded);
        assert_eq!(fx.notifier.count().await, 0);
    }

    #[tokio::test]
    async fn test_trigger_for_deleted_workflow_is_ignored() {
        let fx = fixture();
        fx.engine.handle_trigger(trigger(999)).await.unwrap();
        assert!(fx.job_store.snapshot().await.is_empty());
    }
}
