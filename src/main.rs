mod app;
mod shutdown;

use clap::{Arg, Command};
use tracing_subscriber::EnvFilter;

use platform_core::AppConfig;

use crate::app::Application;

fn init_logging(level: &str, format: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| anyhow::anyhow!("无效的日志级别 {level}: {e}"))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = Command::new("platform")
        .about("模块工作流调度平台")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径")
                .default_value("config/platform.toml"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("覆盖配置中的日志级别"),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str);
    let mut config = AppConfig::load(config_path)?;
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.log.level = level.clone();
    }
    init_logging(&config.log.level, &config.log.format)?;
    tracing::info!("配置加载完成, 监听地址 {}", config.server.bind_address);

    Application::new(config).run().await
}
