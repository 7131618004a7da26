//! 统一配置系统
//!
//! 提供TOML/JSON配置文件、环境变量覆盖，在创建运行时时应用到引擎
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::bindings::MODULE_LOADER_SYMBOL;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 文件读取错误
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),
    /// 解析错误
    #[error("Config parse error: {0}")]
    ParseError(String),
    /// 验证错误
    #[error("Config validation error: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 运行时配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// 引擎堆内存上限 (字节)，未设置表示不限制
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<usize>,

    /// 最大栈大小 (字节)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_stack_size: Option<usize>,

    /// 触发GC的分配阈值 (字节)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gc_threshold: Option<usize>,

    /// 模块加载请求使用的保留符号
    pub module_loader_symbol: String,

    /// 创建运行时时是否立即启用模块加载器
    pub enable_module_loader: bool,

    /// 日志配置
    pub logging: LoggingConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            memory_limit: None,
            max_stack_size: None,
            gc_threshold: None,
            module_loader_symbol: MODULE_LOADER_SYMBOL.to_string(),
            enable_module_loader: false,
            logging: LoggingConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从TOML文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_toml_str(&content)
    }

    /// 从TOML字符串解析配置
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_json_str(&content)
    }

    /// 从JSON字符串解析配置
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 保存为TOML文件
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 保存为JSON文件
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 从环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        if let Some(limit) = parse_env("JSBRIDGE_MEMORY_LIMIT") {
            self.memory_limit = Some(limit);
        }
        if let Some(size) = parse_env("JSBRIDGE_MAX_STACK_SIZE") {
            self.max_stack_size = Some(size);
        }
        if let Some(threshold) = parse_env("JSBRIDGE_GC_THRESHOLD") {
            self.gc_threshold = Some(threshold);
        }
        if let Ok(symbol) = env::var("JSBRIDGE_MODULE_LOADER_SYMBOL") {
            self.module_loader_symbol = symbol;
        }
        if let Ok(val) = env::var("JSBRIDGE_ENABLE_MODULE_LOADER") {
            self.enable_module_loader = val.parse().unwrap_or(self.enable_module_loader);
        }
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.memory_limit == Some(0) {
            return Err(ConfigError::ValidationError(
                "memory_limit must be non-zero; omit it for no limit".to_string(),
            ));
        }
        if self.gc_threshold == Some(0) {
            return Err(ConfigError::ValidationError(
                "gc_threshold must be non-zero".to_string(),
            ));
        }
        if self.module_loader_symbol.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "module_loader_symbol must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// 自动查找并加载配置文件
    ///
    /// 按以下顺序查找：
    /// 1. ./jsbridge.toml
    /// 2. ./jsbridge.json
    /// 3. <用户配置目录>/jsbridge/config.toml
    /// 4. 使用默认配置
    pub fn load_or_default() -> Self {
        if let Ok(config) = Self::from_toml_file("jsbridge.toml") {
            tracing::info!(target: "jsbridge::config", "Loaded config from jsbridge.toml");
            return config;
        }

        if let Ok(config) = Self::from_json_file("jsbridge.json") {
            tracing::info!(target: "jsbridge::config", "Loaded config from jsbridge.json");
            return config;
        }

        if let Some(path) = user_config_path() {
            if let Ok(config) = Self::from_toml_file(&path) {
                tracing::info!(target: "jsbridge::config", path = %path.display(), "Loaded config");
                return config;
            }
        }

        tracing::debug!(target: "jsbridge::config", "Using default configuration");
        Self::default()
    }
}

fn parse_env(name: &str) -> Option<usize> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(target: "jsbridge::config", var = name, value = %raw, "Ignoring non-numeric override");
            None
        }
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("jsbridge").join("config.toml"))
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,

    /// 是否输出日志目标 (模块路径)
    pub show_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            show_target: true,
        }
    }
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// 跟踪
    Trace,
    /// 调试
    Debug,
    /// 信息
    Info,
    /// 警告
    Warn,
    /// 错误
    Error,
}

impl LogLevel {
    /// 对应的 `EnvFilter` 指令
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
