//! Owned value handles.
//!
//! A [`Handle`] holds exactly one engine reference to a value. Dropping it is
//! the only way to release that reference and cloning it takes a new one, so
//! every reference is balanced by construction: a handle cannot be freed twice
//! or used after it was freed.
//!
//! [`PersistentHandle`] is the same box detached from a scope so the host can
//! keep a value between calls into the runtime.

use std::fmt;
use std::sync::OnceLock;

use rquickjs::convert::Coerced;
use rquickjs::{qjs, FromJs, Persistent, Value};

use crate::core::{BridgeError, BridgeResult};
use crate::scripting::runtime::{Runtime, Scope};

/// The engine's internal class id for promise objects. It depends on how the
/// engine was built, so it is read off a real promise when the first runtime
/// is created.
static PROMISE_CLASS_ID: OnceLock<qjs::JSClassID> = OnceLock::new();

/// Upper bound for the class id scan; the built-in classes sit far below it.
const MAX_BUILTIN_CLASS_ID: qjs::JSClassID = 256;

/// Records the promise class id from a promise the engine just created.
pub(crate) fn learn_promise_class(promise: &Value<'_>) {
    if PROMISE_CLASS_ID.get().is_some() || !promise.is_object() {
        return;
    }
    // SAFETY: `JS_GetOpaque` only compares the object's class id and returns
    // its opaque slot.
    let class_id = (1..=MAX_BUILTIN_CLASS_ID)
        .find(|&id| unsafe { !qjs::JS_GetOpaque(promise.as_raw(), id).is_null() });
    if let Some(class_id) = class_id {
        let _ = PROMISE_CLASS_ID.set(class_id);
    }
}

/// An owned reference to an engine value, valid inside one [`Scope`].
#[derive(Clone)]
pub struct Handle<'js> {
    value: Value<'js>,
}

impl<'js> Handle<'js> {
    /// Boxes a value. The handle takes over the reference `value` carries.
    pub fn new(value: Value<'js>) -> Self {
        Self { value }
    }

    pub fn as_value(&self) -> &Value<'js> {
        &self.value
    }

    pub fn into_value(self) -> Value<'js> {
        self.value
    }

    /// Takes a second reference to the same value.
    ///
    /// The two handles are independent; each releases its own reference.
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    /// Releases the reference now instead of at the end of the scope.
    pub fn free(self) {
        drop(self);
    }

    pub(crate) fn as_raw(&self) -> qjs::JSValue {
        self.value.as_raw()
    }

    /// A raw value carrying its own reference, for engine calls that consume
    /// their argument.
    pub(crate) fn into_raw(self) -> qjs::JSValue {
        // SAFETY: the duplicate gives the engine its own reference; ours is
        // released when `self` drops at the end of this function.
        unsafe { qjs::JS_DupValue(self.value.as_raw()) }
    }

    /// String conversion using the engine's `ToString` rules.
    pub fn to_string(&self) -> BridgeResult<String> {
        self.coerce::<String>()
    }

    /// Integer conversion using the engine's `ToInt64` rules (`NaN` is 0).
    pub fn to_int64(&self) -> BridgeResult<i64> {
        self.coerce::<i64>()
    }

    pub fn to_float64(&self) -> BridgeResult<f64> {
        self.coerce::<f64>()
    }

    /// Truthiness, as `if (value)` would see it.
    pub fn to_bool(&self) -> BridgeResult<bool> {
        self.coerce::<bool>()
    }

    fn coerce<T>(&self) -> BridgeResult<T>
    where
        Coerced<T>: FromJs<'js>,
    {
        self.value
            .get::<Coerced<T>>()
            .map(|coerced| coerced.0)
            .map_err(|err| BridgeError::from_engine(self.value.ctx(), err))
    }

    pub fn is_array(&self) -> bool {
        self.value.is_array()
    }

    pub fn is_function(&self) -> bool {
        self.value.is_function()
    }

    /// True for promise objects created by the engine.
    ///
    /// This is a class check, so it runs no script code and ignores
    /// `Symbol.hasInstance` overrides, proxies and a replaced global
    /// `Promise`.
    pub fn is_promise(&self) -> bool {
        if !self.value.is_object() {
            return false;
        }
        let Some(&class_id) = PROMISE_CLASS_ID.get() else {
            return false;
        };
        // SAFETY: reading the opaque pointer neither calls into script nor
        // changes reference counts.
        unsafe { !qjs::JS_GetOpaque(self.value.as_raw(), class_id).is_null() }
    }

    pub fn is_object(&self) -> bool {
        self.value.is_object()
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    pub fn is_undefined(&self) -> bool {
        self.value.is_undefined()
    }

    /// A short name for the value's kind, used in error messages.
    pub fn type_name(&self) -> &'static str {
        let value = &self.value;
        if value.is_undefined() {
            "undefined"
        } else if value.is_null() {
            "null"
        } else if value.is_bool() {
            "boolean"
        } else if value.is_int() || value.is_float() {
            "number"
        } else if value.is_string() {
            "string"
        } else if value.is_symbol() {
            "symbol"
        } else if value.is_array() {
            "array"
        } else if value.is_function() {
            "function"
        } else if self.is_promise() {
            "promise"
        } else if value.is_object() {
            "object"
        } else {
            "unknown"
        }
    }
}

impl<'js> From<Value<'js>> for Handle<'js> {
    fn from(value: Value<'js>) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for Handle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("type", &self.type_name())
            .finish()
    }
}

/// A value box that outlives a single [`Scope`].
///
/// The box borrows its [`Runtime`], so the runtime cannot be torn down while
/// the box is alive. Restoring it hands out a fresh [`Handle`] and leaves the
/// box itself intact.
pub struct PersistentHandle<'rt> {
    value: Persistent<Value<'static>>,
    runtime: &'rt Runtime,
}

impl<'rt> PersistentHandle<'rt> {
    pub(crate) fn new(value: Persistent<Value<'static>>, runtime: &'rt Runtime) -> Self {
        runtime.handle_created();
        Self { value, runtime }
    }

    /// Brings the value into `scope` as a new owned handle.
    pub fn restore<'js>(&self, scope: &Scope<'js>) -> BridgeResult<Handle<'js>> {
        let value = self.value.clone().restore(scope.ctx());
        scope.check(value).map(Handle::new)
    }

    /// Takes a second reference; both boxes must be dropped.
    pub fn duplicate(&self) -> Self {
        Self::new(self.value.clone(), self.runtime)
    }

    /// Releases the reference now.
    pub fn free(self) {
        drop(self);
    }
}

impl Clone for PersistentHandle<'_> {
    fn clone(&self) -> Self {
        self.duplicate()
    }
}

impl Drop for PersistentHandle<'_> {
    fn drop(&mut self) {
        self.runtime.handle_released();
    }
}

impl fmt::Debug for PersistentHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentHandle").finish_non_exhaustive()
    }
}
