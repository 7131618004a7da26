//! Engine instance and execution scopes.
//!
//! A [`Runtime`] owns one QuickJS runtime and its context together with the
//! runtime-scoped bridge state: the registered dispatch channel and the
//! module-loader switch. Every value operation happens inside a [`Scope`]
//! opened with [`Runtime::enter`]; handles created there borrow the scope and
//! therefore can never outlive the runtime that produced them.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rquickjs::{qjs, Array, Context, Ctx, Object, Persistent, Type, Value};
use tracing::{debug, info, warn};

use crate::bindings::module_loader::{ChannelLoader, ChannelResolver};
use crate::bindings::{Channel, FnChannel};
use crate::config::BridgeConfig;
use crate::core::{BridgeError, BridgeResult, JsException};
use crate::scripting::handle::{self, Handle, PersistentHandle};

/// Runtime-scoped state reachable from engine callbacks.
pub(crate) struct Shared {
    channel: RefCell<Option<Rc<dyn Channel>>>,
    module_loader_symbol: String,
    entered: Cell<bool>,
}

impl Shared {
    fn new(module_loader_symbol: String) -> Self {
        Self {
            channel: RefCell::new(None),
            module_loader_symbol,
            entered: Cell::new(false),
        }
    }

    /// The channel is cloned out so the slot is not borrowed while it runs.
    pub(crate) fn channel(&self) -> Option<Rc<dyn Channel>> {
        self.channel.borrow().clone()
    }

    pub(crate) fn module_loader_symbol(&self) -> &str {
        &self.module_loader_symbol
    }
}

/// Marks the runtime as entered for the lifetime of the guard.
struct EnterGuard<'a> {
    entered: &'a Cell<bool>,
}

impl<'a> EnterGuard<'a> {
    fn acquire(shared: &'a Shared) -> BridgeResult<Self> {
        if shared.entered.replace(true) {
            return Err(BridgeError::Reentrant);
        }
        Ok(Self {
            entered: &shared.entered,
        })
    }
}

impl Drop for EnterGuard<'_> {
    fn drop(&mut self) {
        self.entered.set(false);
    }
}

/// An engine instance with its bridge state.
///
/// `Runtime` is neither `Send` nor `Sync`: the engine is single threaded and
/// every call, including channel callbacks, runs on the thread that owns it.
pub struct Runtime {
    // Field order matters: the context must be released before the runtime.
    context: Context,
    runtime: rquickjs::Runtime,
    shared: Rc<Shared>,
    live_handles: Cell<usize>,
    module_loader_enabled: Cell<bool>,
    config: BridgeConfig,
}

impl Runtime {
    /// Creates a runtime with the default configuration.
    pub fn new() -> BridgeResult<Self> {
        Self::with_config(BridgeConfig::default())
    }

    /// Creates a runtime and applies the engine limits from `config`.
    pub fn with_config(config: BridgeConfig) -> BridgeResult<Self> {
        config.validate()?;

        let runtime = rquickjs::Runtime::new()
            .map_err(|e| BridgeError::Init(format!("failed to create JS runtime: {}", e)))?;
        if let Some(limit) = config.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(size) = config.max_stack_size {
            runtime.set_max_stack_size(size);
        }
        if let Some(threshold) = config.gc_threshold {
            runtime.set_gc_threshold(threshold);
        }

        let context = Context::full(&runtime)
            .map_err(|e| BridgeError::Init(format!("failed to create JS context: {}", e)))?;

        let shared = Rc::new(Shared::new(config.module_loader_symbol.clone()));
        let this = Self {
            context,
            runtime,
            shared,
            live_handles: Cell::new(0),
            module_loader_enabled: Cell::new(false),
            config,
        };

        this.enter(|scope| {
            let capability = scope.new_promise_capability()?;
            handle::learn_promise_class(capability.promise.as_value());
            Ok(())
        })?;

        if this.config.enable_module_loader {
            this.enable_module_loader();
        }

        info!(
            target: "jsbridge::runtime",
            memory_limit = ?this.config.memory_limit,
            module_loader = this.config.enable_module_loader,
            "Runtime created"
        );
        Ok(this)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Opens a scope on the runtime's context and runs `f` inside it.
    ///
    /// Scopes do not nest: calling `enter` from inside `f` returns
    /// [`BridgeError::Reentrant`]. Channel callbacks receive their own
    /// [`Scope`] and never need to enter.
    pub fn enter<F, R>(&self, f: F) -> BridgeResult<R>
    where
        F: for<'js> FnOnce(Scope<'js>) -> BridgeResult<R>,
    {
        let _guard = EnterGuard::acquire(&self.shared)?;
        let shared = Rc::clone(&self.shared);
        self.context.with(move |ctx| f(Scope::new(ctx, shared)))
    }

    /// Registers the dispatch channel, replacing any previous registration.
    pub fn set_channel<C>(&self, channel: C)
    where
        C: Channel + 'static,
    {
        let previous = self.shared.channel.replace(Some(Rc::new(channel)));
        if previous.is_some() {
            debug!(target: "jsbridge::runtime", "Dispatch channel replaced");
        } else {
            debug!(target: "jsbridge::runtime", "Dispatch channel registered");
        }
    }

    /// Registers a closure as the dispatch channel.
    pub fn set_channel_fn<F>(&self, f: F)
    where
        F: for<'js> Fn(&Scope<'js>, &str, &[Handle<'js>]) -> BridgeResult<Handle<'js>> + 'static,
    {
        self.set_channel(FnChannel::new(f));
    }

    /// Removes the dispatch channel. Later native calls throw in script.
    pub fn clear_channel(&self) {
        self.shared.channel.replace(None);
    }

    pub fn has_channel(&self) -> bool {
        self.shared.channel.borrow().is_some()
    }

    /// Routes unresolved imports through the dispatch channel.
    ///
    /// Once enabled the channel stays the only resolution strategy for the
    /// lifetime of this runtime; later calls are no-ops.
    pub fn enable_module_loader(&self) {
        if self.module_loader_enabled.replace(true) {
            debug!(target: "jsbridge::runtime", "Module loader already enabled");
            return;
        }
        self.runtime.set_loader(
            ChannelResolver,
            ChannelLoader::new(Rc::downgrade(&self.shared)),
        );
        debug!(
            target: "jsbridge::runtime",
            symbol = %self.shared.module_loader_symbol,
            "Module loader enabled"
        );
    }

    pub fn is_module_loader_enabled(&self) -> bool {
        self.module_loader_enabled.get()
    }

    /// Moves a handle out of its scope into a box that lives as long as the
    /// runtime borrow.
    pub fn persist<'js>(
        &self,
        scope: &Scope<'js>,
        handle: Handle<'js>,
    ) -> BridgeResult<PersistentHandle<'_>> {
        if !Rc::ptr_eq(&scope.shared, &self.shared) {
            return Err(BridgeError::Conversion(
                "handle belongs to a different runtime".to_string(),
            ));
        }
        let value = Persistent::save(scope.ctx(), handle.into_value());
        Ok(PersistentHandle::new(value, self))
    }

    /// Number of [`PersistentHandle`]s currently alive for this runtime.
    pub fn live_handles(&self) -> usize {
        self.live_handles.get()
    }

    pub(crate) fn handle_created(&self) {
        self.live_handles.set(self.live_handles.get() + 1);
    }

    pub(crate) fn handle_released(&self) {
        self.live_handles.set(self.live_handles.get().saturating_sub(1));
    }

    /// Runs a full garbage collection cycle.
    pub fn run_gc(&self) {
        self.runtime.run_gc();
    }

    pub(crate) fn engine(&self) -> &rquickjs::Runtime {
        &self.runtime
    }

    pub(crate) fn context(&self) -> &Context {
        &self.context
    }

    pub(crate) fn enter_guard(&self) -> BridgeResult<impl Drop + '_> {
        EnterGuard::acquire(&self.shared)
    }

    /// Clears the channel and destroys the engine.
    ///
    /// Dropping the runtime does the same; this spelling makes the teardown
    /// point explicit at the call site.
    pub fn teardown(self) {
        drop(self);
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shared.channel.replace(None);
        let live = self.live_handles.get();
        if live > 0 {
            warn!(target: "jsbridge::runtime", live, "Runtime dropped with live handles");
        }
        debug!(target: "jsbridge::runtime", "Runtime torn down");
    }
}

/// A promise together with its resolving functions.
#[derive(Debug, Clone)]
pub struct PromiseCapability<'js> {
    pub promise: Handle<'js>,
    pub resolve: Handle<'js>,
    pub reject: Handle<'js>,
}

/// An entered execution context.
///
/// All constructors return owned handles: each one holds a single engine
/// reference released when the handle is dropped.
#[derive(Clone)]
pub struct Scope<'js> {
    ctx: Ctx<'js>,
    shared: Rc<Shared>,
}

impl<'js> Scope<'js> {
    pub(crate) fn new(ctx: Ctx<'js>, shared: Rc<Shared>) -> Self {
        Self { ctx, shared }
    }

    /// The underlying `rquickjs` context, for host code that wants the
    /// typed `rquickjs` API alongside handles.
    pub fn ctx(&self) -> &Ctx<'js> {
        &self.ctx
    }

    pub(crate) fn shared(&self) -> &Rc<Shared> {
        &self.shared
    }

    /// The reserved symbol used for module source requests.
    pub fn module_loader_symbol(&self) -> &str {
        self.shared.module_loader_symbol()
    }

    /// Maps an engine failure, taking any pending exception off the context.
    pub(crate) fn check<T>(&self, result: rquickjs::Result<T>) -> BridgeResult<T> {
        result.map_err(|err| BridgeError::from_engine(&self.ctx, err))
    }

    pub(crate) fn pending_exception(&self) -> BridgeError {
        BridgeError::Exception(JsException::catch(&self.ctx))
    }

    /// Takes ownership of a raw engine result.
    ///
    /// # Safety
    ///
    /// `raw` must be an owned value produced by this scope's context.
    pub(crate) unsafe fn wrap_raw(&self, raw: qjs::JSValue) -> BridgeResult<Handle<'js>> {
        if qjs::JS_VALUE_GET_NORM_TAG(raw) == qjs::JS_TAG_EXCEPTION {
            return Err(self.pending_exception());
        }
        Ok(Handle::new(Value::from_raw(self.ctx.clone(), raw)))
    }

    pub fn new_object(&self) -> BridgeResult<Handle<'js>> {
        let object = self.check(Object::new(self.ctx.clone()))?;
        Ok(Handle::new(object.into_value()))
    }

    pub fn new_string(&self, data: &str) -> BridgeResult<Handle<'js>> {
        let string = self.check(rquickjs::String::from_str(self.ctx.clone(), data))?;
        Ok(Handle::new(string.into_value()))
    }

    /// Integers that fit in 32 bits are stored as engine integers, wider
    /// values as doubles.
    pub fn new_int64(&self, value: i64) -> Handle<'js> {
        let value = match i32::try_from(value) {
            Ok(small) => Value::new_int(self.ctx.clone(), small),
            Err(_) => Value::new_float(self.ctx.clone(), value as f64),
        };
        Handle::new(value)
    }

    pub fn new_float64(&self, value: f64) -> Handle<'js> {
        Handle::new(Value::new_float(self.ctx.clone(), value))
    }

    pub fn new_bool(&self, value: bool) -> Handle<'js> {
        Handle::new(Value::new_bool(self.ctx.clone(), value))
    }

    pub fn new_array(&self) -> BridgeResult<Handle<'js>> {
        let array = self.check(Array::new(self.ctx.clone()))?;
        Ok(Handle::new(array.into_value()))
    }

    pub fn new_null(&self) -> Handle<'js> {
        Handle::new(Value::new_null(self.ctx.clone()))
    }

    pub fn new_undefined(&self) -> Handle<'js> {
        Handle::new(Value::new_undefined(self.ctx.clone()))
    }

    /// Creates a pending promise and the two functions that settle it.
    pub fn new_promise_capability(&self) -> BridgeResult<PromiseCapability<'js>> {
        let ctx = self.ctx.as_raw().as_ptr();
        // SAFETY: the engine writes both resolving functions before returning
        // a non-exception promise; on exception they are left untouched and
        // never wrapped.
        unsafe {
            let mut resolving: [qjs::JSValue; 2] = std::mem::zeroed();
            let promise = qjs::JS_NewPromiseCapability(ctx, resolving.as_mut_ptr());
            let promise = self.wrap_raw(promise)?;
            let [resolve, reject] = resolving;
            Ok(PromiseCapability {
                promise,
                resolve: Handle::new(Value::from_raw(self.ctx.clone(), resolve)),
                reject: Handle::new(Value::from_raw(self.ctx.clone(), reject)),
            })
        }
    }

    /// The context's global object.
    pub fn globals(&self) -> Handle<'js> {
        Handle::new(self.ctx.globals().into_value())
    }

    /// Calls `function` with `this` (or `undefined`) and `args`.
    ///
    /// Arguments are borrowed: the call takes its own references.
    pub fn call(
        &self,
        function: &Handle<'js>,
        this: Option<&Handle<'js>>,
        args: &[Handle<'js>],
    ) -> BridgeResult<Handle<'js>> {
        let function = function.as_value().as_function().ok_or_else(|| {
            BridgeError::Conversion(format!(
                "expected a function, found {}",
                function.type_name()
            ))
        })?;
        let this = match this {
            Some(this) => this.as_value().clone(),
            None => Value::new_undefined(self.ctx.clone()),
        };
        let args: Vec<Value<'js>> = args.iter().map(|arg| arg.as_value().clone()).collect();
        let result = function.call::<_, Value<'js>>((
            rquickjs::function::This(this),
            rquickjs::function::Rest(args),
        ));
        self.check(result).map(Handle::new)
    }

    /// Takes the pending exception off the context, if there is one.
    ///
    /// A thrown `null` or `undefined` is indistinguishable from no exception.
    pub fn take_exception(&self) -> Option<Handle<'js>> {
        let value = self.ctx.catch();
        if matches!(
            value.type_of(),
            Type::Uninitialized | Type::Undefined | Type::Null
        ) {
            return None;
        }
        Some(Handle::new(value))
    }

    /// Throws `value` into script.
    ///
    /// Return the resulting error from a channel callback to make the
    /// native call raise exactly this value.
    pub fn throw(&self, value: Handle<'js>) -> BridgeError {
        let _ = self.ctx.throw(value.into_value());
        BridgeError::Thrown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_creation() {
        let rt = Runtime::new().unwrap();
        assert!(!rt.has_channel());
        assert!(!rt.is_module_loader_enabled());
        assert_eq!(rt.live_handles(), 0);
    }

    #[test]
    fn test_runtime_with_limits() {
        let config = BridgeConfig {
            memory_limit: Some(32 * 1024 * 1024),
            max_stack_size: Some(512 * 1024),
            enable_module_loader: true,
            ..BridgeConfig::default()
        };
        let rt = Runtime::with_config(config).unwrap();
        assert!(rt.is_module_loader_enabled());
        assert_eq!(rt.config().memory_limit, Some(32 * 1024 * 1024));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = BridgeConfig {
            gc_threshold: Some(0),
            ..BridgeConfig::default()
        };
        assert!(matches!(
            Runtime::with_config(config),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn test_enter_is_not_reentrant() {
        let rt = Runtime::new().unwrap();
        let nested = rt.enter(|_scope| Ok(rt.enter(|_inner| Ok(()))));
        assert!(matches!(nested, Ok(Err(BridgeError::Reentrant))));

        // The guard is released once the outer scope ends.
        assert!(rt.enter(|_scope| Ok(())).is_ok());
    }

    #[test]
    fn test_primitive_constructors() {
        let rt = Runtime::new().unwrap();
        rt.enter(|scope| {
            assert_eq!(scope.new_int64(-7).to_int64()?, -7);
            assert_eq!(scope.new_int64(1 << 40).to_int64()?, 1 << 40);
            assert_eq!(scope.new_float64(2.5).to_float64()?, 2.5);
            assert!(scope.new_bool(true).to_bool()?);
            assert_eq!(scope.new_string("héllo")?.to_string()?, "héllo");
            assert!(scope.new_null().is_null());
            assert!(scope.new_undefined().is_undefined());
            assert!(scope.new_array()?.is_array());
            assert!(scope.new_object()?.is_object());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_promise_capability() {
        let rt = Runtime::new().unwrap();
        rt.enter(|scope| {
            let capability = scope.new_promise_capability()?;
            assert!(capability.promise.is_promise());
            assert!(capability.resolve.is_function());
            assert!(capability.reject.is_function());

            let value = scope.new_int64(9);
            scope.call(&capability.resolve, None, &[value])?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_call_and_throw() {
        let rt = Runtime::new().unwrap();
        rt.enter(|scope| {
            let add = scope.evaluate(
                "(function (a, b) { return a + b; })",
                "add.js",
                crate::scripting::EvalFlags::GLOBAL,
            )?;
            let sum = scope.call(&add, None, &[scope.new_int64(2), scope.new_int64(3)])?;
            assert_eq!(sum.to_int64()?, 5);

            let not_callable = scope.new_int64(1);
            assert!(matches!(
                scope.call(&not_callable, None, &[]),
                Err(BridgeError::Conversion(_))
            ));

            let _ = scope.throw(scope.new_string("oops")?);
            let thrown = scope.take_exception().expect("exception pending");
            assert_eq!(thrown.to_string()?, "oops");
            assert!(scope.take_exception().is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_persist_and_restore() {
        let rt = Runtime::new().unwrap();
        let boxed = rt
            .enter(|scope| {
                let value = scope.new_string("kept")?;
                rt.persist(&scope, value)
            })
            .unwrap();
        assert_eq!(rt.live_handles(), 1);

        let copy = boxed.duplicate();
        assert_eq!(rt.live_handles(), 2);
        drop(boxed);

        let text = rt
            .enter(|scope| copy.restore(&scope)?.to_string())
            .unwrap();
        assert_eq!(text, "kept");
        drop(copy);
        assert_eq!(rt.live_handles(), 0);
    }

    #[test]
    fn test_persist_rejects_foreign_scope() {
        let rt = Runtime::new().unwrap();
        let other = Runtime::new().unwrap();
        let result = other.enter(|scope| {
            let value = scope.new_int64(1);
            Ok(rt.persist(&scope, value).is_err())
        });
        assert!(result.unwrap());
        assert_eq!(rt.live_handles(), 0);
    }
}
