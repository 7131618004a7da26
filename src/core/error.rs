//! 统一错误处理模块
//!
//! 提供边界层范围内的统一错误类型定义
//!
//! ## 错误分类
//!
//! - **脚本异常**: 编译错误与运行时 `throw` 都会在边界处被捕获，转换为 [`JsException`]
//! - **转换错误**: 边界处的类型不匹配 (例如对非对象读取属性)
//! - **解析失败**: 模块加载器找不到模块时，由引擎以脚本可见的异常抛出
//! - **误用**: 重入运行时、通道未注册等，以显式错误返回
//!
//! 引擎异常从不以 panic 的形式穿过边界。

use std::fmt;

use rquickjs::convert::Coerced;
use rquickjs::{Ctx, Value};
use thiserror::Error;

use crate::config::ConfigError;

/// 边界层错误类型
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Uncaught exception: {0}")]
    Exception(JsException),

    /// 宿主已通过 `Scope::throw` 设置了待抛出的异常
    #[error("Exception thrown by host")]
    Thrown,

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("No channel registered")]
    ChannelNotSet,

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Runtime is already entered")]
    Reentrant,

    #[error("Invalid compiled artifact: {0}")]
    InvalidArtifact(String),

    #[error("Initialization error: {0}")]
    Init(String),

    #[error("Engine error: {0}")]
    Engine(#[from] rquickjs::Error),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl BridgeError {
    /// 将引擎错误转换为边界错误
    ///
    /// `rquickjs::Error::Exception` 表示异常仍挂在上下文上，这里把它取出，
    /// 这样失败的调用之后运行时仍然可以继续使用。
    pub(crate) fn from_engine(ctx: &Ctx<'_>, err: rquickjs::Error) -> Self {
        match err {
            rquickjs::Error::Exception => BridgeError::Exception(JsException::catch(ctx)),
            other => BridgeError::Engine(other),
        }
    }

    /// 是否为脚本异常
    pub fn is_exception(&self) -> bool {
        matches!(self, BridgeError::Exception(_) | BridgeError::Thrown)
    }
}

/// 从引擎中取出的脚本异常
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsException {
    /// 错误构造器名称，例如 `TypeError`
    pub name: Option<String>,
    pub message: String,
    pub stack: Option<String>,
}

impl JsException {
    /// 取出上下文中挂起的异常
    pub(crate) fn catch(ctx: &Ctx<'_>) -> Self {
        Self::from_value(&ctx.catch())
    }

    /// 从一个被抛出的值构造
    ///
    /// Error 对象读取 `name`/`message`/`stack`，其他值按字符串强制转换。
    pub fn from_value(value: &Value<'_>) -> Self {
        if let Some(object) = value.as_object() {
            let message = object.get::<_, Option<String>>("message").ok().flatten();
            if let Some(message) = message {
                return Self {
                    name: object.get::<_, Option<String>>("name").ok().flatten(),
                    message,
                    stack: object
                        .get::<_, Option<String>>("stack")
                        .ok()
                        .flatten()
                        .filter(|stack| !stack.is_empty()),
                };
            }
        }

        let message = value
            .get::<Coerced<String>>()
            .map(|coerced| coerced.0)
            .unwrap_or_else(|_| "<unprintable exception>".to_string());
        Self {
            name: None,
            message,
            stack: None,
        }
    }
}

impl fmt::Display for JsException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}: {}", name, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// 边界层结果类型别名
pub type BridgeResult<T> = Result<T, BridgeError>;
