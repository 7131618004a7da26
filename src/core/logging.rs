//! 日志初始化
//!
//! 使用 tracing 日志框架。`RUST_LOG` 环境变量优先于配置中的级别。

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// 初始化日志系统
///
/// 重复调用是安全的：已安装的全局订阅者不会被替换。
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_filter()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.show_target)
        .try_init();

    tracing::debug!(target: "jsbridge", filter = config.level.as_filter(), "Logging initialized");
}
