//! Host Binding Layer
//!
//! Script code reaches the host through one runtime-scoped dispatch
//! channel. Native functions carry only a symbol name; the channel decides
//! at call time what the symbol means. Module imports the engine cannot
//! resolve itself go through the same channel under a reserved symbol.
//!
//! Architecture:
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Script code                            │
//! │     nativeFn(args...)              import { x } from "m"    │
//! │           │                                  │              │
//! │           v                                  v              │
//! │  ┌─────────────────┐              ┌──────────────────────┐  │
//! │  │ native function │              │ ChannelResolver /    │  │
//! │  │ (symbol only)   │              │ ChannelLoader        │  │
//! │  └────────┬────────┘              └──────────┬───────────┘  │
//! │           │  (scope, symbol, args)           │ load_module  │
//! │           v                                  v              │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │           Channel (one per Runtime)                 │    │
//! │  │    closure  |  SymbolTable { symbol -> Capability } │    │
//! │  └───────────────────────┬─────────────────────────────┘    │
//! │                          │                                  │
//! │                          v                                  │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                   Host code                         │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod channel;
pub mod module_loader;

pub use channel::{Capability, Channel, FnChannel, SymbolTable};
pub use module_loader::normalize_module_name;

/// Default reserved symbol for module source requests.
pub const MODULE_LOADER_SYMBOL: &str = "module_loader";
