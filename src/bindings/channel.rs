//! Dispatch channel and native functions.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use rquickjs::function::Rest;
use rquickjs::{Ctx, Exception, Function, Value};
use tracing::{debug, trace, warn};

use crate::core::{BridgeError, BridgeResult};
use crate::scripting::runtime::{Scope, Shared};
use crate::scripting::Handle;

/// Host side of every script-to-host call.
///
/// `call` runs synchronously on the engine thread while the calling script
/// frame is paused. It receives borrowed argument handles and returns a new
/// owned handle. Returning an error raises it in script: use
/// [`Scope::throw`] to raise a specific value.
pub trait Channel {
    fn call<'js>(
        &self,
        scope: &Scope<'js>,
        symbol: &str,
        args: &[Handle<'js>],
    ) -> BridgeResult<Handle<'js>>;

    /// Supplies the source text of module `name`, or `None` if there is no
    /// such module.
    ///
    /// The default sends the name as a string to the reserved module-loader
    /// symbol; a `null` or `undefined` answer means not found.
    fn load_module<'js>(&self, scope: &Scope<'js>, name: &str) -> BridgeResult<Option<String>> {
        let request = scope.new_string(name)?;
        let source = self.call(scope, scope.module_loader_symbol(), &[request])?;
        if source.is_null() || source.is_undefined() {
            return Ok(None);
        }
        source.to_string().map(Some)
    }
}

impl<C: Channel + ?Sized> Channel for Rc<C> {
    fn call<'js>(
        &self,
        scope: &Scope<'js>,
        symbol: &str,
        args: &[Handle<'js>],
    ) -> BridgeResult<Handle<'js>> {
        (**self).call(scope, symbol, args)
    }

    fn load_module<'js>(&self, scope: &Scope<'js>, name: &str) -> BridgeResult<Option<String>> {
        (**self).load_module(scope, name)
    }
}

/// A closure used as the channel.
pub struct FnChannel<F> {
    f: F,
}

impl<F> FnChannel<F>
where
    F: for<'js> Fn(&Scope<'js>, &str, &[Handle<'js>]) -> BridgeResult<Handle<'js>>,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Channel for FnChannel<F>
where
    F: for<'js> Fn(&Scope<'js>, &str, &[Handle<'js>]) -> BridgeResult<Handle<'js>>,
{
    fn call<'js>(
        &self,
        scope: &Scope<'js>,
        symbol: &str,
        args: &[Handle<'js>],
    ) -> BridgeResult<Handle<'js>> {
        (self.f)(scope, symbol, args)
    }
}

/// Signature of a host function registered in a [`SymbolTable`].
pub type NativeFn = dyn for<'js> Fn(&Scope<'js>, &[Handle<'js>]) -> BridgeResult<Handle<'js>>;

/// Signature of a module source provider registered in a [`SymbolTable`].
pub type ModuleSourceFn = dyn Fn(&str) -> Option<String>;

/// What a symbol stands for.
pub enum Capability {
    /// A function callable from script.
    Function(Box<NativeFn>),
    /// A module source provider, normally bound to the module-loader symbol.
    /// Called from script it takes a module name and returns the source or
    /// `null`.
    ModuleSource(Box<ModuleSourceFn>),
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Function(_) => f.write_str("Capability::Function"),
            Capability::ModuleSource(_) => f.write_str("Capability::ModuleSource"),
        }
    }
}

/// A channel that maps symbols to registered capabilities.
///
/// Lookups happen on every call, so capabilities can be registered or
/// replaced after native functions referring to them were created. Share it
/// with the runtime through an `Rc` to keep registering after
/// [`Runtime::set_channel`](crate::scripting::Runtime::set_channel).
#[derive(Default)]
pub struct SymbolTable {
    entries: RefCell<HashMap<String, Rc<Capability>>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, symbol: impl Into<String>, capability: Capability) {
        let symbol = symbol.into();
        debug!(target: "jsbridge::channel", symbol = %symbol, ?capability, "Registered");
        self.entries.borrow_mut().insert(symbol, Rc::new(capability));
    }

    pub fn register_function<F>(&self, symbol: impl Into<String>, f: F)
    where
        F: for<'js> Fn(&Scope<'js>, &[Handle<'js>]) -> BridgeResult<Handle<'js>> + 'static,
    {
        self.register(symbol, Capability::Function(Box::new(f)));
    }

    pub fn register_module_source<F>(&self, symbol: impl Into<String>, f: F)
    where
        F: Fn(&str) -> Option<String> + 'static,
    {
        self.register(symbol, Capability::ModuleSource(Box::new(f)));
    }

    pub fn unregister(&self, symbol: &str) -> bool {
        self.entries.borrow_mut().remove(symbol).is_some()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.entries.borrow().contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    // Cloned out so a capability may touch the table while it runs.
    fn lookup(&self, symbol: &str) -> BridgeResult<Rc<Capability>> {
        self.entries
            .borrow()
            .get(symbol)
            .cloned()
            .ok_or_else(|| BridgeError::UnknownSymbol(symbol.to_string()))
    }
}

impl Channel for SymbolTable {
    fn call<'js>(
        &self,
        scope: &Scope<'js>,
        symbol: &str,
        args: &[Handle<'js>],
    ) -> BridgeResult<Handle<'js>> {
        match &*self.lookup(symbol)? {
            Capability::Function(f) => f(scope, args),
            Capability::ModuleSource(source) => {
                let name = match args.first() {
                    Some(name) => name.to_string()?,
                    None => {
                        return Err(BridgeError::Conversion(format!(
                            "{} expects a module name",
                            symbol
                        )))
                    }
                };
                match source(&name) {
                    Some(text) => scope.new_string(&text),
                    None => Ok(scope.new_null()),
                }
            }
        }
    }

    fn load_module<'js>(&self, scope: &Scope<'js>, name: &str) -> BridgeResult<Option<String>> {
        match &*self.lookup(scope.module_loader_symbol())? {
            Capability::ModuleSource(source) => Ok(source(name)),
            Capability::Function(f) => {
                let source = f(scope, &[scope.new_string(name)?])?;
                if source.is_null() || source.is_undefined() {
                    return Ok(None);
                }
                source.to_string().map(Some)
            }
        }
    }
}

/// Builds a script function that forwards its calls to the channel under
/// `symbol`.
pub(crate) fn native_function<'js>(scope: &Scope<'js>, symbol: &str) -> BridgeResult<Handle<'js>> {
    let shared = Rc::downgrade(scope.shared());
    let symbol = symbol.to_string();
    let function = Function::new(
        scope.ctx().clone(),
        move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
            dispatch(&shared, &symbol, ctx, args.0)
        },
    );
    let function = scope.check(function)?;
    Ok(Handle::new(function.into_value()))
}

fn dispatch<'js>(
    shared: &Weak<Shared>,
    symbol: &str,
    ctx: Ctx<'js>,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    let Some(shared) = shared.upgrade() else {
        return Err(Exception::throw_message(&ctx, "runtime has been torn down"));
    };
    let Some(channel) = shared.channel() else {
        warn!(target: "jsbridge::channel", symbol, "Native call without a channel");
        return Err(throw_into_script(&ctx, BridgeError::ChannelNotSet));
    };

    trace!(target: "jsbridge::channel", symbol, argc = args.len(), "Dispatch");
    let scope = Scope::new(ctx.clone(), shared);
    let args: Vec<Handle<'js>> = args.into_iter().map(Handle::new).collect();
    match channel.call(&scope, symbol, &args) {
        Ok(result) => Ok(result.into_value()),
        Err(err) => {
            debug!(target: "jsbridge::channel", symbol, error = %err, "Channel call failed");
            Err(throw_into_script(&ctx, err))
        }
    }
}

/// Raises a host error in script and returns the engine's exception marker.
fn throw_into_script(ctx: &Ctx<'_>, err: BridgeError) -> rquickjs::Error {
    match err {
        BridgeError::Thrown => rquickjs::Error::Exception,
        BridgeError::UnknownSymbol(symbol) => {
            Exception::throw_reference(ctx, &format!("{} is not registered", symbol))
        }
        BridgeError::ChannelNotSet => Exception::throw_message(ctx, "no channel registered"),
        BridgeError::Exception(exception) => Exception::throw_message(ctx, &exception.to_string()),
        BridgeError::Engine(engine) => engine,
        other => Exception::throw_message(ctx, &other.to_string()),
    }
}

impl<'js> Scope<'js> {
    /// A script function that calls the runtime's channel with `symbol`.
    ///
    /// The symbol is resolved on each call, not now: the channel may be
    /// registered or replaced later.
    pub fn new_native_function(&self, symbol: &str) -> BridgeResult<Handle<'js>> {
        native_function(self, symbol)
    }
}
