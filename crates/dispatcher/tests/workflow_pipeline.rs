//! 从触发到结果归账的全链路测试

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use platform_dispatcher::{DispatchEngine, JobStore, Reconciler, WorkflowScheduler};
use platform_domain::entities::{ExecuteModuleEntry, JobRecordState, TimeShift, Workflow};
use platform_domain::messages::{FailureReason, Frame, ResultFrame, ResultStatus};
use platform_domain::repositories::WorkflowRepository;
use platform_gateway::{ModuleRegistry, SessionGateway, SessionHandle};
use platform_infrastructure::{
    InMemoryModuleRepository, InMemoryWorkflowRepository, RecordingNotifier,
};

struct Pipeline {
    workflows: Arc<InMemoryWorkflowRepository>,
    registry: Arc<ModuleRegistry>,
    sessions: Arc<SessionGateway>,
    job_store: Arc<JobStore>,
    notifier: Arc<RecordingNotifier>,
    scheduler: Arc<WorkflowScheduler>,
    trigger_rx: tokio::sync::mpsc::Receiver<platform_dispatcher::TriggerEvent>,
    engine: DispatchEngine,
    reconciler: Reconciler,
}

fn pipeline() -> Pipeline {
    let workflows = Arc::new(InMemoryWorkflowRepository::new());
    let registry = Arc::new(ModuleRegistry::new(Arc::new(
        InMemoryModuleRepository::new(),
    )));
    let (sessions, _events) = SessionGateway::new(16);
    let sessions = Arc::new(sessions);
    let job_store = Arc::new(JobStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let (scheduler, trigger_rx) =
        WorkflowScheduler::new(workflows.clone(), Duration::from_secs(1));
    let engine = DispatchEngine::new(
        workflows.clone(),
        registry.clone(),
        sessions.clone(),
        job_store.clone(),
        notifier.clone(),
        chrono::Duration::seconds(120),
    );
    let reconciler = Reconciler::new(job_store.clone(), notifier.clone());
    Pipeline {
        workflows,
        registry,
        sessions,
        job_store,
        notifier,
        scheduler: Arc::new(scheduler),
        trigger_rx,
        engine,
        reconciler,
    }
}

async fn connect(p: &Pipeline, hash: &str) -> tokio::sync::mpsc::Receiver<String> {
    let (out_tx, out_rx) = tokio::sync::mpsc::channel(8);
    let (close_tx, _close_rx) = tokio::sync::mpsc::channel(1);
    p.sessions
        .bind(
            hash,
            SessionHandle {
                session_id: "s1".to_string(),
                outbound: out_tx,
                close: close_tx,
            },
        )
        .await;
    p.registry.bind_session(hash, "s1").await.unwrap();
    out_rx
}

#[tokio::test]
async fn manual_trigger_dispatches_and_reconciles_success() {
    let mut p = pipeline();
    let module = p
        .registry
        .register("weather", "天气采集", &json!({"city": "string"}), &json!({}))
        .await
        .unwrap();
    let mut out_rx = connect(&p, &module.module_hash).await;
    let workflow = p
        .workflows
        .insert(Workflow {
            workflow_id: 0,
            name: "早间采集".to_string(),
            description: String::new(),
            enable: true,
            execute_cron_list: vec!["0 10 * * 1-5".to_string()],
            execute_shift: TimeShift::parse("-30s").unwrap(),
            execute_modules: vec![ExecuteModuleEntry {
                module_hash: module.module_hash.clone(),
                args: json!({"city": "beijing"}),
            }],
        })
        .await
        .unwrap();
    p.scheduler.reload().await.unwrap();

    p.scheduler.trigger_now(workflow.workflow_id).await.unwrap();
    let event = p.trigger_rx.recv().await.unwrap();
    assert!(event.manual);
    p.engine.handle_trigger(event).await.unwrap();

    // 模块收到执行指令
    let text = out_rx.recv().await.unwrap();
    let frame: Frame = serde_json::from_str(&text).unwrap();
    let Frame::Execute { meta, args } = frame else {
        panic!("应当是执行指令帧");
    };
    assert_eq!(meta.workflow_name, "早间采集");
    assert_eq!(args["city"], "beijing");

    // 模块上报成功，记录归账
    p.reconciler
        .handle_result(
            &module.module_hash,
            ResultFrame {
                status: ResultStatus::Success,
                workflow_id: workflow.workflow_id,
                workflow_name: None,
                module_name: None,
                error: None,
                message: None,
            },
        )
        .await;
    let jobs = p.job_store.snapshot().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].records[0].state, JobRecordState::Succeeded);
    assert!(jobs[0].finalized_at.is_some());
    assert_eq!(p.notifier.count().await, 0);
}

#[tokio::test]
async fn offline_module_fails_without_retry() {
    let mut p = pipeline();
    let module = p
        .registry
        .register("weather", "", &json!({"city": "string"}), &json!({}))
        .await
        .unwrap();
    let workflow = p
        .workflows
        .insert(Workflow {
            workflow_id: 0,
            name: "采集".to_string(),
            description: String::new(),
            enable: true,
            execute_cron_list: vec!["* * * * *".to_string()],
            execute_shift: TimeShift::zero(),
            execute_modules: vec![ExecuteModuleEntry {
                module_hash: module.module_hash.clone(),
                args: json!({"city": "beijing"}),
            }],
        })
        .await
        .unwrap();

    p.scheduler.trigger_now(workflow.workflow_id).await.unwrap();
    let event = p.trigger_rx.recv().await.unwrap();
    p.engine.handle_trigger(event).await.unwrap();

    let jobs = p.job_store.snapshot().await;
    assert_eq!(jobs[0].records[0].state, JobRecordState::Failed);
    let notifications = p.notifier.take().await;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].reason, FailureReason::ModuleOffline);
    assert_eq!(notifications[0].module_hash, module.module_hash);
}

#[tokio::test]
async fn reload_does_not_touch_in_flight_jobs() {
    let mut p = pipeline();
    let module = p
        .registry
        .register("weather", "", &json!({}), &json!({}))
        .await
        .unwrap();
    let _out_rx = connect(&p, &module.module_hash).await;
    let workflow = p
        .workflows
        .insert(Workflow {
            workflow_id: 0,
            name: "采集".to_string(),
            description: String::new(),
            enable: true,
            execute_cron_list: vec!["* * * * *".to_string()],
            execute_shift: TimeShift::zero(),
            execute_modules: vec![ExecuteModuleEntry {
                module_hash: module.module_hash.clone(),
                args: json!({}),
            }],
        })
        .await
        .unwrap();
    p.scheduler.reload().await.unwrap();

    p.scheduler.trigger_now(workflow.workflow_id).await.unwrap();
    let event = p.trigger_rx.recv().await.unwrap();
    p.engine.handle_trigger(event).await.unwrap();
    let before = p.job_store.snapshot().await;
    assert_eq!(before[0].records[0].state, JobRecordState::AwaitingResult);

    // 停用并重载只影响后续触发，在途执行单不变
    p.workflows.set_enabled(workflow.workflow_id, false).await.unwrap();
    let summary = p.scheduler.reload().await.unwrap();
    assert_eq!(summary.removed_count, 1);
    let after = p.job_store.snapshot().await;
    assert_eq!(after[0].id, before[0].id);
    assert_eq!(after[0].records[0].state, JobRecordState::AwaitingResult);
}

#[tokio::test]
async fn timeout_sweep_closes_stuck_records() {
    let mut p = pipeline();
    let module = p
        .registry
        .register("slow", "", &json!({}), &json!({}))
        .await
        .unwrap();
    let _out_rx = connect(&p, &module.module_hash).await;
    let workflow = p
        .workflows
        .insert(Workflow {
            workflow_id: 0,
            name: "慢任务".to_string(),
            description: String::new(),
            enable: true,
            execute_cron_list: vec!["* * * * *".to_string()],
            execute_shift: TimeShift::zero(),
            execute_modules: vec![ExecuteModuleEntry {
                module_hash: module.module_hash.clone(),
                args: json!({}),
            }],
        })
        .await
        .unwrap();

    p.scheduler.trigger_now(workflow.workflow_id).await.unwrap();
    let event = p.trigger_rx.recv().await.unwrap();
    p.engine.handle_trigger(event).await.unwrap();

    // 截止时间未到不超时
    assert_eq!(p.reconciler.sweep_timeouts(Utc::now()).await, 0);
    // 越过截止时间后判定超时并通知
    let later = Utc::now() + chrono::Duration::seconds(121);
    assert_eq!(p.reconciler.sweep_timeouts(later).await, 1);
    let notifications = p.notifier.take().await;
    assert_eq!(notifications[0].reason, FailureReason::ExecutionTimedOut);
    // 迟到的成功上报匹配不上，状态保持超时
    p.reconciler
        .handle_result(
            &module.module_hash,
            ResultFrame {
                status: ResultStatus::Success,
                workflow_id: workflow.workflow_id,
                workflow_name: None,
                module_name: None,
                error: None,
                message: None,
            },
        )
        .await;
    assert_eq!(
        p.job_store.snapshot().await[0].records[0].state,
        JobRecordState::TimedOut
    );
}
