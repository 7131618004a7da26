//! 脚本运行时
//!
//! 基于 rquickjs 的 QuickJS 运行时封装：
//! - `runtime` - 运行时与执行作用域
//! - `handle` - 值句柄与引用计数
//! - `property` - 属性读写
//! - `eval` - 源码求值
//! - `bytecode` - 字节码编译与加载
//! - `jobs` - 待处理任务队列

pub mod bytecode;
pub mod eval;
pub mod handle;
pub mod jobs;
pub mod property;
pub mod runtime;

pub use bytecode::{ArtifactKind, CompiledArtifact};
pub use eval::EvalFlags;
pub use handle::{Handle, PersistentHandle};
pub use jobs::JobStatus;
pub use property::PropertyFlags;
pub use runtime::{PromiseCapability, Runtime, Scope};
