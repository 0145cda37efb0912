use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{PlatformError, PlatformResult};

/// 应用配置
///
/// 从TOML文件加载，所有字段都有默认值；`PLATFORM__SECTION__KEY`
/// 形式的环境变量可以覆盖文件中的配置项。
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub scheduler: SchedulerConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP/WebSocket 监听地址
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// 会话保活Ping间隔（秒）
    pub ping_interval_seconds: u64,
    /// 每个会话出站队列容量
    pub outbound_queue_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ping_interval_seconds: 30,
            outbound_queue_size: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 调度tick间隔（秒）
    pub tick_interval_seconds: u64,
    /// 执行结果超时检查间隔（秒）
    pub timeout_check_interval_seconds: u64,
    /// 执行指令等待超时时间（秒）
    pub execution_timeout_seconds: i64,
    /// 终态Job保留时长（秒），超过后由每周清理任务删除
    pub job_retention_seconds: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 1,
            timeout_check_interval_seconds: 30,
            execution_timeout_seconds: 120,
            job_retention_seconds: 604_800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// "pretty" 或 "json"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// 加载配置：文件（可选）+ 环境变量覆盖 + 校验
    pub fn load(path: Option<&str>) -> PlatformResult<Self> {
        let mut config = match path {
            Some(p) if Path::new(p).exists() => {
                let content = std::fs::read_to_string(p).map_err(|e| {
                    PlatformError::Configuration(format!("读取配置文件 {p} 失败: {e}"))
                })?;
                toml::from_str(&content).map_err(|e| {
                    PlatformError::Configuration(format!("解析配置文件 {p} 失败: {e}"))
                })?
            }
            Some(p) => {
                tracing::warn!("配置文件 {} 不存在，使用默认配置", p);
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// 应用 `PLATFORM__SECTION__KEY` 形式的环境变量覆盖
    fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            let Some(rest) = key.strip_prefix("PLATFORM__") else {
                continue;
            };
            let parts: Vec<&str> = rest.splitn(2, "__").collect();
            if parts.len() != 2 {
                continue;
            }
            let (section, field) = (parts[0].to_lowercase(), parts[1].to_lowercase());
            if let Err(e) = self.set_override(&section, &field, &value) {
                tracing::warn!("环境变量 {} 覆盖失败: {}", key, e);
            }
        }
    }

    fn set_override(&mut self, section: &str, field: &str, value: &str) -> PlatformResult<()> {
        let parse_err =
            |e| PlatformError::Configuration(format!("{section}.{field} 的值无效: {e}"));
        match (section, field) {
            ("server", "bind_address") => self.server.bind_address = value.to_string(),
            ("gateway", "ping_interval_seconds") => {
                self.gateway.ping_interval_seconds = value.parse().map_err(parse_err)?
            }
            ("gateway", "outbound_queue_size") => {
                self.gateway.outbound_queue_size = value.parse().map_err(parse_err)?
            }
            ("scheduler", "tick_interval_seconds") => {
                self.scheduler.tick_interval_seconds = value.parse().map_err(parse_err)?
            }
            ("scheduler", "timeout_check_interval_seconds") => {
                self.scheduler.timeout_check_interval_seconds = value.parse().map_err(parse_err)?
            }
            ("scheduler", "execution_timeout_seconds") => {
                self.scheduler.execution_timeout_seconds = value.parse().map_err(parse_err)?
            }
            ("scheduler", "job_retention_seconds") => {
                self.scheduler.job_retention_seconds = value.parse().map_err(parse_err)?
            }
            ("log", "level") => self.log.level = value.to_string(),
            ("log", "format") => self.log.format = value.to_string(),
            _ => {
                return Err(PlatformError::Configuration(format!(
                    "未知的配置项: {section}.{field}"
                )))
            }
        }
        Ok(())
    }

    /// 校验配置的合法性
    pub fn validate(&self) -> PlatformResult<()> {
        if self.server.bind_address.is_empty() {
            return Err(PlatformError::Configuration(
                "server.bind_address 不能为空".to_string(),
            ));
        }
        if self.gateway.ping_interval_seconds == 0 {
            return Err(PlatformError::Configuration(
                "gateway.ping_interval_seconds 必须大于0".to_string(),
            ));
        }
        if self.gateway.outbound_queue_size == 0 {
            return Err(PlatformError::Configuration(
                "gateway.outbound_queue_size 必须大于0".to_string(),
            ));
        }
        if self.scheduler.tick_interval_seconds == 0 {
            return Err(PlatformError::Configuration(
                "scheduler.tick_interval_seconds 必须大于0".to_string(),
            ));
        }
        if self.scheduler.execution_timeout_seconds <= 0 {
            return Err(PlatformError::Configuration(
                "scheduler.execution_timeout_seconds 必须大于0".to_string(),
            ));
        }
        if self.scheduler.job_retention_seconds <= 0 {
            return Err(PlatformError::Configuration(
                "scheduler.job_retention_seconds 必须大于0".to_string(),
            ));
        }
        if !matches!(self.log.format.as_str(), "pretty" | "json") {
            return Err(PlatformError::Configuration(format!(
                "不支持的日志格式: {}",
                self.log.format
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.execution_timeout_seconds, 120);
        assert_eq!(config.scheduler.job_retention_seconds, 604_800);
    }

    #[test]
    fn test_load_from_toml() {
        let toml_str = r#"
            [server]
            bind_address = "127.0.0.1:9000"

            [scheduler]
            execution_timeout_seconds = 60
        "#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:9000");
        assert_eq!(config.scheduler.execution_timeout_seconds, 60);
        // 未出现的字段保持默认值
        assert_eq!(config.scheduler.timeout_check_interval_seconds, 30);
    }

    #[test]
    fn test_validate_rejects_bad_format() {
        let mut config = AppConfig::default();
        config.log.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_set_override() {
        let mut config = AppConfig::default();
        config
            .set_override("scheduler", "execution_timeout_seconds", "45")
            .unwrap();
        assert_eq!(config.scheduler.execution_timeout_seconds, 45);
        assert!(config.set_override("scheduler", "unknown", "1").is_err());
        assert!(config
            .set_override("gateway", "ping_interval_seconds", "abc")
            .is_err());
    }
}
