use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use platform_core::{PlatformError, PlatformResult};
use platform_domain::entities::{Module, Workflow};
use platform_domain::repositories::{ModuleRepository, WorkflowRepository};

/// 基于内存的模块存储，以身份哈希为主键
pub struct InMemoryModuleRepository {
    modules: RwLock<HashMap<String, Module>>,
    next_id: AtomicI64,
}

impl InMemoryModuleRepository {
    pub fn new() -> Self {
        Self {
            modules: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl Default for InMemoryModuleRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModuleRepository for InMemoryModuleRepository {
    async fn insert(&self, mut module: Module) -> PlatformResult<Module> {
        let mut modules = self.modules.write().await;
        // 注册是幂等的：同一哈希直接返回已有记录
        if let Some(existing) = modules.get(&module.module_hash) {
            return Ok(existing.clone());
        }
        module.module_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        modules.insert(module.module_hash.clone(), module.clone());
        Ok(module)
    }

    async fn get_by_hash(&self, hash: &str) -> PlatformResult<Option<Module>> {
        Ok(self.modules.read().await.get(hash).cloned())
    }

    async fn get_by_name(&self, name: &str) -> PlatformResult<Option<Module>> {
        Ok(self
            .modules
            .read()
            .await
            .values()
            .find(|m| m.name == name)
            .cloned())
    }

    async fn list(&self) -> PlatformResult<Vec<Module>> {
        let mut all: Vec<Module> = self.modules.read().await.values().cloned().collect();
        all.sort_by_key(|m| m.module_id);
        Ok(all)
    }

    async fn bind_session(
        &self,
        hash: &str,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> PlatformResult<()> {
        let mut modules = self.modules.write().await;
        let module = modules.get_mut(hash).ok_or_else(|| {
            PlatformError::ModuleNotFound {
                hash: hash.to_string(),
            }
        })?;
        module.alive = true;
        module.session_id = Some(session_id.to_string());
        module.last_login_time = Some(at);
        module.last_alive_time = Some(at);
        Ok(())
    }

    async fn clear_session(&self, hash: &str, session_id: &str) -> PlatformResult<bool> {
        let mut modules = self.modules.write().await;
        let Some(module) = modules.get_mut(hash) else {
            return Ok(false);
        };
        if module.session_id.as_deref() != Some(session_id) {
            // 已经被更新的会话取代，断开回调不再生效
            return Ok(false);
        }
        module.alive = false;
        module.session_id = None;
        Ok(true)
    }

    async fn touch_alive(&self, hash: &str, at: DateTime<Utc>) -> PlatformResult<()> {
        let mut modules = self.modules.write().await;
        if let Some(module) = modules.get_mut(hash) {
            module.last_alive_time = Some(at);
        }
        Ok(())
    }

    async fn touch_execution(&self, hash: &str, at: DateTime<Utc>) -> PlatformResult<()> {
        let mut modules = self.modules.write().await;
        if let Some(module) = modules.get_mut(hash) {
            module.last_execution_time = Some(at);
        }
        Ok(())
    }

    async fn expire_all(&self) -> PlatformResult<u64> {
        let mut modules = self.modules.write().await;
        let mut count = 0;
        for module in modules.values_mut() {
            if module.alive || module.session_id.is_some() {
                module.alive = false;
                module.session_id = None;
                count += 1;
            }
        }
        Ok(count)
    }
}

/// 基于内存的工作流存储
pub struct InMemoryWorkflowRepository {
    workflows: RwLock<HashMap<i64, Workflow>>,
    next_id: AtomicI64,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl Default for InMemoryWorkflowRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn insert(&self, mut workflow: Workflow) -> PlatformResult<Workflow> {
        let mut workflows = self.workflows.write().await;
        workflow.workflow_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        workflows.insert(workflow.workflow_id, workflow.clone());
        Ok(workflow)
    }

    async fn get_by_id(&self, id: i64) -> PlatformResult<Option<Workflow>> {
        Ok(self.workflows.read().await.get(&id).cloned())
    }

    async fn list(&self) -> PlatformResult<Vec<Workflow>> {
        let mut all: Vec<Workflow> = self.workflows.read().await.values().cloned().collect();
        all.sort_by_key(|w| w.workflow_id);
        Ok(all)
    }

    async fn list_enabled(&self) -> PlatformResult<Vec<Workflow>> {
        let mut enabled: Vec<Workflow> = self
            .workflows
            .read()
            .await
            .values()
            .filter(|w| w.enable)
            .cloned()
            .collect();
        enabled.sort_by_key(|w| w.workflow_id);
        Ok(enabled)
    }

    async fn set_enabled(&self, id: i64, enable: bool) -> PlatformResult<Workflow> {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows
            .get_mut(&id)
            .ok_or(PlatformError::WorkflowNotFound { id })?;
        workflow.enable = enable;
        Ok(workflow.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform_domain::entities::TimeShift;
    use platform_domain::requirement::NormalizedRequirement;
    use serde_json::json;

    fn sample_module(name: &str) -> Module {
        let input =
            NormalizedRequirement::resolve(&json!({"city": "string"})).unwrap();
        Module::new(
            name.to_string(),
            "测试模块".to_string(),
            input,
            NormalizedRequirement::default(),
        )
    }

    fn sample_workflow(name: &str) -> Workflow {
        Workflow {
            workflow_id: 0,
            name: name.to_string(),
            description: String::new(),
            enable: true,
            execute_cron_list: vec!["0 10 * * *".to_string()],
            execute_shift: TimeShift::zero(),
            execute_modules: vec![],
        }
    }

    #[tokio::test]
    async fn test_module_insert_is_idempotent() {
        let repo = InMemoryModuleRepository::new();
        let first = repo.insert(sample_module("weather")).await.unwrap();
        let second = repo.insert(sample_module("weather")).await.unwrap();
        assert_eq!(first.module_id, second.module_id);
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_session_requires_matching_id() {
        let repo = InMemoryModuleRepository::new();
        let module = repo.insert(sample_module("weather")).await.unwrap();
        let hash = module.module_hash.clone();
        repo.bind_session(&hash, "s1", Utc::now()).await.unwrap();
        // 新会话顶替旧会话
        repo.bind_session(&hash, "s2", Utc::now()).await.unwrap();
        assert!(!repo.clear_session(&hash, "s1").await.unwrap());
        let current = repo.get_by_hash(&hash).await.unwrap().unwrap();
        assert!(current.alive);
        assert_eq!(current.session_id.as_deref(), Some("s2"));
        assert!(repo.clear_session(&hash, "s2").await.unwrap());
        let current = repo.get_by_hash(&hash).await.unwrap().unwrap();
        assert!(!current.alive);
    }

    #[tokio::test]
    async fn test_expire_all() {
        let repo = InMemoryModuleRepository::new();
        let a = repo.insert(sample_module("a")).await.unwrap();
        let _b = repo.insert(sample_module("b")).await.unwrap();
        repo.bind_session(&a.module_hash, "s1", Utc::now())
            .await
            .unwrap();
        assert_eq!(repo.expire_all().await.unwrap(), 1);
        assert!(!repo
            .get_by_hash(&a.module_hash)
            .await
            .unwrap()
            .unwrap()
            .alive);
    }

    #[tokio::test]
    async fn test_workflow_enable_toggle() {
        let repo = InMemoryWorkflowRepository::new();
        let wf = repo.insert(sample_workflow("采集")).await.unwrap();
        assert_eq!(repo.list_enabled().await.unwrap().len(), 1);
        repo.set_enabled(wf.workflow_id, false).await.unwrap();
        assert!(repo.list_enabled().await.unwrap().is_empty());
        assert!(repo.set_enabled(999, true).await.is_err());
    }
}
