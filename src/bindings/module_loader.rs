//! Module resolution through the dispatch channel.

use std::rc::Weak;

use rquickjs::loader::{Loader, Resolver};
use rquickjs::module::ModuleData;
use rquickjs::{Ctx, Error};
use tracing::{debug, warn};

use crate::scripting::runtime::{Scope, Shared};

/// Resolves an import specifier against the importing module's name.
///
/// Specifiers starting with `.` are joined to the directory of `base` with
/// `.` and `..` segments collapsed. Anything else is returned unchanged.
pub fn normalize_module_name(base: &str, name: &str) -> String {
    if !name.starts_with('.') {
        return name.to_string();
    }

    let mut segments: Vec<&str> = match base.rfind('/') {
        Some(end) => base[..end].split('/').collect(),
        None => Vec::new(),
    };
    for part in name.split('/') {
        match part {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." && !last.is_empty() => {
                    segments.pop();
                }
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }
    segments.join("/")
}

pub(crate) struct ChannelResolver;

impl Resolver for ChannelResolver {
    fn resolve<'js>(&mut self, _ctx: &Ctx<'js>, base: &str, name: &str) -> rquickjs::Result<String> {
        Ok(normalize_module_name(base, name))
    }
}

/// Asks the channel for module source and declares it.
pub(crate) struct ChannelLoader {
    shared: Weak<Shared>,
}

impl ChannelLoader {
    pub(crate) fn new(shared: Weak<Shared>) -> Self {
        Self { shared }
    }
}

impl Loader for ChannelLoader {
    fn load<'js>(&mut self, ctx: &Ctx<'js>, name: &str) -> rquickjs::Result<ModuleData> {
        let shared = self.shared.upgrade().ok_or_else(|| Error::new_loading(name))?;
        let Some(channel) = shared.channel() else {
            warn!(target: "jsbridge::loader", module = name, "Import without a channel");
            return Err(Error::new_loading(name));
        };

        let scope = Scope::new(ctx.clone(), shared);
        let source = match channel.load_module(&scope, name) {
            Ok(Some(source)) => source,
            Ok(None) => {
                debug!(target: "jsbridge::loader", module = name, "Module not found");
                return Err(Error::new_loading(name));
            }
            Err(err) => {
                // A host-thrown value would otherwise stay pending.
                let _ = ctx.catch();
                warn!(target: "jsbridge::loader", module = name, error = %err, "Module source request failed");
                return Err(Error::new_loading(name));
            }
        };

        // The engine compiles the source after this returns, so a syntax
        // error surfaces as an exception from the importing evaluation.
        debug!(target: "jsbridge::loader", module = name, len = source.len(), "Loaded module source");
        Ok(ModuleData::source(name, source))
    }
}
