use std::sync::Arc;

use chrono::Utc;

use platform_core::{PlatformError, PlatformResult};
use platform_domain::entities::Module;
use platform_domain::repositories::ModuleRepository;
use platform_domain::requirement::NormalizedRequirement;

/// 模块注册与在线状态管理
///
/// 在存储接口之上实现注册幂等、会话绑定和在线名单查询。
pub struct ModuleRegistry {
    modules: Arc<dyn ModuleRepository>,
}

impl ModuleRegistry {
    pub fn new(modules: Arc<dyn ModuleRepository>) -> Self {
        Self { modules }
    }

    /// 注册模块
    ///
    /// 名称和输入需求相同的重复注册返回同一条记录和同一个哈希。
    pub async fn register(
        &self,
        name: &str,
        description: &str,
        input_data: &serde_json::Value,
        output_data: &serde_json::Value,
    ) -> PlatformResult<Module> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PlatformError::Validation("模块名称不能为空".to_string()));
        }
        let input = NormalizedRequirement::resolve(input_data)?;
        let output = NormalizedRequirement::resolve(output_data)?;
        let module = Module::new(name.to_string(), description.to_string(), input, output);
        let stored = self.modules.insert(module).await?;
        tracing::info!(
            module_id = stored.module_id,
            hash = %stored.module_hash,
            "模块注册: {}",
            stored.name
        );
        Ok(stored)
    }

    pub async fn get(&self, hash: &str) -> PlatformResult<Option<Module>> {
        self.modules.get_by_hash(hash).await
    }

    pub async fn get_by_name(&self, name: &str) -> PlatformResult<Option<Module>> {
        self.modules.get_by_name(name).await
    }

    pub async fn list(&self) -> PlatformResult<Vec<Module>> {
        self.modules.list().await
    }

    /// 在线模块名单，按哈希排序保证输出稳定
    pub async fn list_online(&self) -> PlatformResult<Vec<Module>> {
        let mut online: Vec<Module> = self
            .modules
            .list()
            .await?
            .into_iter()
            .filter(|m| m.alive)
            .collect();
        online.sort_by(|a, b| a.module_hash.cmp(&b.module_hash));
        Ok(online)
    }

    /// 会话建立时绑定模块，模块必须已注册
    pub async fn bind_session(&self, hash: &str, session_id: &str) -> PlatformResult<()> {
        self.modules.bind_session(hash, session_id, Utc::now()).await
    }

    /// 会话断开时解绑，session_id不匹配时忽略（已被新会话顶替）
    pub async fn unbind_session(&self, hash: &str, session_id: &str) -> PlatformResult<bool> {
        self.modules.clear_session(hash, session_id).await
    }

    /// 收到Pong时刷新存活时间
    pub async fn mark_alive(&self, hash: &str) -> PlatformResult<()> {
        self.modules.touch_alive(hash, Utc::now()).await
    }

    pub async fn mark_executed(&self, hash: &str) -> PlatformResult<()> {
        self.modules.touch_execution(hash, Utc::now()).await
    }

    /// 启动时清理上个进程遗留的在线状态
    pub async fn expire_all(&self) -> PlatformResult<u64> {
        let count = self.modules.expire_all().await?;
        if count > 0 {
            tracing::info!("已清理 {} 个陈旧的在线会话标记", count);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform_infrastructure::InMemoryModuleRepository;
    use serde_json::json;

    fn registry() -> ModuleRegistry {
        ModuleRegistry::new(Arc::new(InMemoryModuleRepository::new()))
    }

    #[tokio::test]
    async fn test_register_idempotent_same_hash() {
        let registry = registry();
        let input = json!({"city": "string", "days": "integer"});
        let reordered = json!({"days": "integer", "city": "string"});
        let first = registry
            .register("weather", "天气采集", &input, &json!({}))
            .await
            .unwrap();
        let second = registry
            .register("weather", "天气采集", &reordered, &json!({}))
            .await
            .unwrap();
        assert_eq!(first.module_hash, second.module_hash);
        assert_eq!(first.module_id, second.module_id);
        assert_eq!(registry.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_rejects_empty_name() {
        let registry = registry();
        let result = registry.register("  ", "", &json!({}), &json!({})).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_online_list_sorted_by_hash() {
        let registry = registry();
        let a = registry
            .register("alpha", "", &json!({}), &json!({}))
            .await
            .unwrap();
        let b = registry
            .register("beta", "", &json!({}), &json!({}))
            .await
            .unwrap();
        registry.bind_session(&a.module_hash, "s1").await.unwrap();
        registry.bind_session(&b.module_hash, "s2").await.unwrap();
        let online = registry.list_online().await.unwrap();
        assert_eq!(online.len(), 2);
        assert!(online[0].module_hash < online[1].module_hash);
    }

    #[tokio::test]
    async fn test_bind_requires_registration() {
        let registry = registry();
        assert!(registry.bind_session("missing", "s1").await.is_err());
    }
}
