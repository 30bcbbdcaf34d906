//! Hot reload: rebinding after method bodies were replaced, and telling the
//! application about it.
//!
//! The runtime applies a delta and reports which methods got a new version.
//! Bindings into the old versions are dropped and every affected record is
//! bound again against the new code.
//!
//! ## Application update handlers
//!
//! Applications refresh their own caches through static
//! `ClearCache(Type[])` and `UpdateApplication(Type[])` methods. Those can
//! only run on a thread stopped inside managed code, so arming a reload places
//! internal breakpoints at the start of the updated methods. The first one hit
//! releases all of them and runs every `ClearCache` handler, then every
//! `UpdateApplication` handler, through function evaluation. Handlers are
//! found in modules with symbols and receive `null` for the type list, which
//! they treat as "any type may have changed". The debuggee does not stop.
//!
//! The updated type tokens are kept per module until the front end collects
//! them, so it can refresh cached type state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::record::{keep_first, release_all, Binding};
use super::{EventBatch, KindManager};
use crate::error::Result;
use crate::eval::EvalStackMachine;
use crate::runtime::{DebugRuntime, Module, NativeBreakpoint, Thread};
use crate::symbols::{SymbolLookup, SymbolService};
use crate::types::{EvalFlags, MethodToken, ModuleId, TypeToken};

/// Handler method names, in the order they run.
const HANDLER_METHODS: [&str; 2] = ["ClearCache", "UpdateApplication"];

/// One static handler method found in a loaded module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateHandler
{
    pub module: ModuleId,
    pub method: MethodToken,
    pub qualified_name: String,
}

#[derive(Default)]
struct ReloadState
{
    updated_types: BTreeMap<String, BTreeSet<TypeToken>>,
    /// Internal breakpoints waiting for the first thread to run new code.
    triggers: Vec<Binding>,
}

pub struct HotReload
{
    runtime: Arc<dyn DebugRuntime>,
    symbols: Arc<dyn SymbolService>,
    state: Mutex<ReloadState>,
}

impl HotReload
{
    pub fn new(runtime: Arc<dyn DebugRuntime>, symbols: Arc<dyn SymbolService>) -> Self
    {
        Self {
            runtime,
            symbols,
            state: Mutex::new(ReloadState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ReloadState>
    {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remember the types a delta for `module` touched.
    pub fn record_updated_types(&self, module: &str, types: &[TypeToken])
    {
        self.state()
            .updated_types
            .entry(module.to_string())
            .or_default()
            .extend(types.iter().copied());
    }

    /// Hand out and clear the updated types, per module name.
    pub fn take_updated_types(&self) -> Vec<(String, Vec<TypeToken>)>
    {
        std::mem::take(&mut self.state().updated_types)
            .into_iter()
            .map(|(module, types)| (module, types.into_iter().collect()))
            .collect()
    }

    /// Rebind every manager's records in the changed methods.
    ///
    /// Each affected record produces exactly one `Changed` event.
    pub fn apply(&self, module: &dyn Module, changed: &[MethodToken], managers: &[&dyn KindManager]) -> EventBatch
    {
        let mut batch = EventBatch::default();
        for manager in managers {
            batch.absorb(manager.on_hot_reload(module, changed));
        }
        tracing::info!(methods = changed.len(), events = batch.events.len(), "hot reload applied");
        batch
    }

    /// Record the updated types of `module` and place internal breakpoints at
    /// the start of `methods`, the new code of the delta.
    ///
    /// # Errors
    ///
    /// The first failure creating a breakpoint; the others are still placed.
    pub fn arm(&self, module: &dyn Module, types: &[TypeToken], methods: &[MethodToken]) -> Result<()>
    {
        self.record_updated_types(&module.name()?, types);
        let mut first_error = None;
        let mut created = Vec::with_capacity(methods.len());
        for &method in methods {
            match Binding::create(self.runtime.as_ref(), module, method, 0, true) {
                Ok(binding) => created.push(binding),
                Err(err) => keep_first(&mut first_error, Err(err)),
            }
        }
        tracing::debug!(triggers = created.len(), "application reload armed");
        self.state().triggers.extend(created);
        first_error.map_or(Ok(()), Err)
    }

    #[must_use]
    pub fn is_armed(&self) -> bool
    {
        !self.state().triggers.is_empty()
    }

    /// Whether `native` is one of the internal reload breakpoints. A hit
    /// releases all of them.
    pub fn check_hit(&self, native: &dyn NativeBreakpoint) -> Result<bool>
    {
        let triggers = {
            let mut state = self.state();
            if !state.triggers.iter().any(|binding| binding.owns(native)) {
                return Ok(false);
            }
            std::mem::take(&mut state.triggers)
        };
        release_all(triggers.into_iter())?;
        Ok(true)
    }

    /// Static update handlers of every loaded module with symbols, every
    /// `ClearCache` before any `UpdateApplication`.
    pub fn update_handlers(&self) -> Result<Vec<UpdateHandler>>
    {
        let modules = self.runtime.loaded_modules()?;
        let mut handlers = Vec::new();
        for name in HANDLER_METHODS {
            for module in &modules {
                let SymbolLookup::Found(methods) = self.symbols.find_methods(&**module, name)? else {
                    continue;
                };
                handlers.extend(methods.into_iter().filter(|m| takes_type_array(&m.signature)).map(|m| UpdateHandler {
                    module: module.module_id(),
                    method: m.token,
                    qualified_name: m.qualified_name,
                }));
            }
        }
        Ok(handlers)
    }

    /// Run every update handler on `thread`. Returns how many completed.
    ///
    /// A handler that fails or throws is logged and the rest still run.
    pub fn notify_application(&self, machine: &EvalStackMachine, thread: &dyn Thread, flags: EvalFlags) -> Result<usize>
    {
        if flags.contains(EvalFlags::NO_FUNC_EVAL) {
            tracing::warn!("application update handlers skipped, function evaluation is disabled");
            return Ok(0);
        }
        let handlers = self.update_handlers()?;
        let no_types = self.runtime.create_null(thread)?;
        let mut completed = 0;
        for handler in &handlers {
            match machine.call_static(thread, flags, handler.module, handler.method, &[&*no_types]) {
                Ok(_) => completed += 1,
                Err(err) => tracing::warn!(handler = %handler.qualified_name, "update handler failed: {err}"),
            }
        }
        tracing::info!(handlers = handlers.len(), completed, "application notified of hot reload");
        Ok(completed)
    }

    /// Drop pending triggers and recorded types.
    pub fn reset(&self) -> Result<()>
    {
        let triggers = {
            let mut state = self.state();
            state.updated_types.clear();
            std::mem::take(&mut state.triggers)
        };
        release_all(triggers.into_iter())
    }
}

/// `(System.Type[])`, `(Type[] types)` and similar one-parameter lists.
fn takes_type_array(signature: &str) -> bool
{
    let inner = signature.trim().trim_start_matches('(').trim_end_matches(')').trim();
    let parameter_type = inner.split_whitespace().next().unwrap_or_default();
    !inner.contains(',') && (parameter_type == "Type[]" || parameter_type.ends_with(".Type[]") || parameter_type.ends_with(".Type[]?"))
}
