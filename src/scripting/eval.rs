//! Source evaluation with an explicit filename and flag word.

use std::ffi::CString;
use std::fmt;
use std::ops::BitOr;

use rquickjs::qjs;

use crate::core::{BridgeError, BridgeResult};
use crate::scripting::handle::Handle;
use crate::scripting::runtime::Scope;

/// Evaluation flags, bit-compatible with the engine's `JS_EVAL_*` values.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EvalFlags(i32);

impl EvalFlags {
    /// Global script code.
    pub const GLOBAL: Self = Self(0);
    /// Module code. Imports are resolved before evaluation starts.
    pub const MODULE: Self = Self(1);
    /// Force strict mode.
    pub const STRICT: Self = Self(1 << 3);
    /// Parse and compile only; the result is the compiled function or module.
    pub const COMPILE_ONLY: Self = Self(1 << 5);
    /// Hide the host frames below this evaluation from stack traces.
    pub const BACKTRACE_BARRIER: Self = Self(1 << 6);

    const TYPE_MASK: i32 = 0b11;
    const KNOWN: i32 =
        Self::TYPE_MASK | Self::STRICT.0 | Self::COMPILE_ONLY.0 | Self::BACKTRACE_BARRIER.0;

    pub const fn bits(self) -> i32 {
        self.0
    }

    /// Accepts a raw flag word, rejecting unknown bits and evaluation types
    /// other than global and module.
    pub const fn from_bits(bits: i32) -> Option<Self> {
        if bits & !Self::KNOWN != 0 || bits & Self::TYPE_MASK > 1 {
            return None;
        }
        Some(Self(bits))
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_module(self) -> bool {
        self.0 & Self::TYPE_MASK == Self::MODULE.0
    }
}

impl BitOr for EvalFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for EvalFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = vec![if self.is_module() { "MODULE" } else { "GLOBAL" }];
        if self.contains(Self::STRICT) {
            parts.push("STRICT");
        }
        if self.contains(Self::COMPILE_ONLY) {
            parts.push("COMPILE_ONLY");
        }
        if self.contains(Self::BACKTRACE_BARRIER) {
            parts.push("BACKTRACE_BARRIER");
        }
        write!(f, "EvalFlags({})", parts.join(" | "))
    }
}

pub(crate) fn c_string(text: &str, what: &str) -> BridgeResult<CString> {
    CString::new(text)
        .map_err(|_| BridgeError::Conversion(format!("{} contains an interior NUL byte", what)))
}

impl<'js> Scope<'js> {
    /// Compiles and runs `source` under `flags`.
    ///
    /// Script errors come back as [`BridgeError::Exception`] with the
    /// exception already taken off the context, so the runtime stays usable.
    ///
    /// Module bodies run to completion before this returns. An error thrown
    /// by the body or by a failed import fails the call the same way a
    /// script error does.
    pub fn evaluate(
        &self,
        source: &str,
        filename: &str,
        flags: EvalFlags,
    ) -> BridgeResult<Handle<'js>> {
        let input = c_string(source, "source")?;
        let filename = c_string(filename, "filename")?;
        tracing::trace!(
            target: "jsbridge::eval",
            filename = ?filename,
            flags = ?flags,
            len = source.len(),
            "Evaluating"
        );

        // SAFETY: `input` is NUL terminated as the parser requires and both
        // strings outlive the call. The result is an owned value or the
        // exception sentinel, which `wrap_raw` checks first.
        unsafe {
            let raw = qjs::JS_Eval(
                self.ctx().as_raw().as_ptr(),
                input.as_ptr(),
                source.len() as _,
                filename.as_ptr(),
                flags.bits() as _,
            );
            self.wrap_raw(raw)
        }
    }
}
