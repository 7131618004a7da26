//! # jsbridge
//!
//! A host/engine boundary layer for the QuickJS engine built on `rquickjs`.
//!
//! ## Features
//!
//! - **Owned value handles**: every handle holds one engine reference and
//!   releases it on drop; duplicates are independent handles
//! - **Dispatch channel**: script calls host functions by symbol through one
//!   runtime-scoped channel, resolved at call time
//! - **Module loading**: unresolved imports are answered by the channel
//! - **Bytecode**: compile once, store the artifact, run it later without the source
//! - **Job draining**: promise continuations run one step at a time, driven by the host
//!
//! ## Architecture Design
//!
//! - **Runtime**: one engine runtime plus its context and bridge state
//! - **Scope**: an entered context; all value operations go through it
//! - **Handle**: a value borrowed from a scope, so it cannot outlive the runtime
//!
//! ### Example
//!
//! ```no_run
//! use jsbridge::{EvalFlags, Runtime};
//!
//! # fn main() -> jsbridge::BridgeResult<()> {
//! let rt = Runtime::new()?;
//! rt.set_channel_fn(|scope, symbol, args| match symbol {
//!     "echo" => match args.first() {
//!         Some(arg) => Ok(arg.duplicate()),
//!         None => Ok(scope.new_undefined()),
//!     },
//!     _ => Ok(scope.new_undefined()),
//! });
//! let text = rt.enter(|scope| {
//!     let echo = scope.new_native_function("echo")?;
//!     scope.globals().set_property_by_name("echo", echo)?;
//!     scope.evaluate("echo('hi')", "main.js", EvalFlags::GLOBAL)?.to_string()
//! })?;
//! assert_eq!(text, "hi");
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`scripting`]: runtime, scopes, handles, evaluation, bytecode, jobs
//! - [`bindings`]: dispatch channel and module loader
//! - [`config`]: runtime configuration
//! - [`core`]: errors and logging

/// Dispatch channel and module resolution
pub mod bindings;
/// Configuration system
pub mod config;
/// Errors and logging
pub mod core;
/// QuickJS runtime, scopes and value handles
pub mod scripting;

pub use bindings::{Capability, Channel, FnChannel, SymbolTable, MODULE_LOADER_SYMBOL};
pub use config::{BridgeConfig, ConfigError, LogLevel, LoggingConfig};
pub use core::{init_logging, BridgeError, BridgeResult, JsException};
pub use scripting::{
    ArtifactKind, CompiledArtifact, EvalFlags, Handle, JobStatus, PersistentHandle,
    PromiseCapability, PropertyFlags, Runtime, Scope,
};
