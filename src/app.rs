use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use platform_api::{create_app, AppState};
use platform_core::AppConfig;
use platform_dispatcher::{DispatchEngine, JobPruner, JobStore, Reconciler, WorkflowScheduler};
use platform_gateway::{ConnectionContext, ModuleRegistry, SessionGateway};
use platform_infrastructure::{
    InMemoryModuleRepository, InMemoryWorkflowRepository, LoggingNotifier,
};

use crate::shutdown::ShutdownManager;

/// 平台应用：组装各组件并管理它们的生命周期
pub struct Application {
    config: AppConfig,
}

impl Application {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// 启动所有后台循环和HTTP服务，阻塞到收到终止信号
    pub async fn run(self) -> anyhow::Result<()> {
        let config = self.config;

        let module_repo = Arc::new(InMemoryModuleRepository::new());
        let workflow_repo = Arc::new(InMemoryWorkflowRepository::new());
        let registry = Arc::new(ModuleRegistry::new(module_repo));
        let (sessions, event_rx) = SessionGateway::new(256);
        let sessions = Arc::new(sessions);
        let job_store = Arc::new(JobStore::new());
        let notifier = Arc::new(LoggingNotifier);

        // 启动先清掉上个进程遗留的在线标记
        registry
            .expire_all()
            .await
            .context("清理陈旧会话状态失败")?;

        let (scheduler, trigger_rx) = WorkflowScheduler::new(
            workflow_repo.clone(),
            Duration::from_secs(config.scheduler.tick_interval_seconds),
        );
        let scheduler = Arc::new(scheduler);
        scheduler.reload().await.context("构建调度表失败")?;

        let engine = Arc::new(DispatchEngine::new(
            workflow_repo.clone(),
            registry.clone(),
            sessions.clone(),
            job_store.clone(),
            notifier.clone(),
            chrono::Duration::seconds(config.scheduler.execution_timeout_seconds),
        ));
        let reconciler = Arc::new(Reconciler::new(job_store.clone(), notifier));
        let pruner = Arc::new(
            JobPruner::new(job_store.clone(), config.scheduler.job_retention_seconds)
                .context("初始化清理任务失败")?,
        );

        let shutdown = ShutdownManager::new();

        {
            let scheduler = scheduler.clone();
            let rx = shutdown.subscribe();
            tokio::spawn(async move { scheduler.run(rx).await });
        }
        {
            let engine = engine.clone();
            let rx = shutdown.subscribe();
            tokio::spawn(async move { engine.run(trigger_rx, rx).await });
        }
        {
            let reconciler = reconciler.clone();
            let rx = shutdown.subscribe();
            tokio::spawn(async move { reconciler.run(event_rx, rx).await });
        }
        {
            let reconciler = reconciler.clone();
            let rx = shutdown.subscribe();
            let interval = Duration::from_secs(config.scheduler.timeout_check_interval_seconds);
            tokio::spawn(async move { reconciler.run_timeout_sweep(interval, rx).await });
        }
        {
            let pruner = pruner.clone();
            let rx = shutdown.subscribe();
            tokio::spawn(async move { pruner.run(rx).await });
        }

        let state = AppState {
            registry: registry.clone(),
            sessions: sessions.clone(),
            workflows: workflow_repo,
            scheduler,
            job_store,
            conn_ctx: ConnectionContext {
                registry,
                sessions,
                ping_interval: Duration::from_secs(config.gateway.ping_interval_seconds),
                outbound_queue_size: config.gateway.outbound_queue_size,
            },
        };
        let app = create_app(state);

        let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
            .await
            .with_context(|| format!("监听 {} 失败", config.server.bind_address))?;
        tracing::info!("HTTP服务启动: {}", config.server.bind_address);

        let signal_shutdown = shutdown.clone();
        tokio::spawn(async move {
            ShutdownManager::wait_for_signal().await;
            tracing::info!("收到终止信号，开始优雅停机");
            signal_shutdown.shutdown();
        });

        let mut serve_shutdown = shutdown.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = serve_shutdown.recv().await;
            })
            .await
            .context("HTTP服务异常退出")?;

        tracing::info!("平台已停止");
        Ok(())
    }
}
