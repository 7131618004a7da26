//! 核心模块
//!
//! 包含边界层的公共基础设施：
//! - `error` - 错误类型定义
//! - `logging` - 日志初始化

pub mod error;
pub mod logging;

// 重新导出错误类型
pub use error::{BridgeError, BridgeResult, JsException};
pub use logging::init_logging;
