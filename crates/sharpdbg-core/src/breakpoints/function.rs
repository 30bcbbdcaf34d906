//! Function breakpoints: stop at the entry of every method matching a name.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::record::{keep_first, module_matches, release_all, Binding, Record};
use super::{Breakpoint, BreakpointEvent, BreakpointId, BreakpointKind, BreakpointLocation, EventReason, HitCandidate, HitCondition, IdAllocator, KindManager};
use crate::error::Result;
use crate::runtime::{DebugRuntime, Module, NativeBreakpoint};
use crate::symbols::{SymbolLookup, SymbolService};
use crate::types::MethodToken;

/// Front-end request for a function breakpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionBreakpointRequest
{
    /// Restrict the search to one module (`App` or `App.dll`).
    pub module: Option<String>,
    /// Simple or qualified method name, e.g. `Main` or `App.Program.Main`.
    pub name: String,
    /// Parameter list such as `(int, string)`; empty matches every overload.
    pub signature: String,
    pub condition: Option<String>,
    pub hit_condition: Option<HitCondition>,
}

impl FunctionBreakpointRequest
{
    #[must_use]
    pub fn new(name: &str) -> Self
    {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn in_module(mut self, module: &str) -> Self
    {
        self.module = Some(module.to_string());
        self
    }

    #[must_use]
    pub fn signature(mut self, signature: &str) -> Self
    {
        self.signature = signature.to_string();
        self
    }

    #[must_use]
    pub fn condition(mut self, condition: &str) -> Self
    {
        self.condition = Some(condition.to_string());
        self
    }

    #[must_use]
    pub fn hit_condition(mut self, hit_condition: HitCondition) -> Self
    {
        self.hit_condition = Some(hit_condition);
        self
    }

    fn key(&self) -> FunctionKey
    {
        FunctionKey {
            module: self.module.clone().unwrap_or_default(),
            name: self.name.trim().to_string(),
            signature: normalize_signature(&self.signature),
        }
    }
}

/// Records are keyed by what the user asked for, so a re-sent request keeps
/// its identifier and hit count.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FunctionKey
{
    module: String,
    name: String,
    signature: String,
}

impl FunctionKey
{
    fn location(&self) -> BreakpointLocation
    {
        BreakpointLocation::Function {
            module: (!self.module.is_empty()).then(|| self.module.clone()),
            name: self.name.clone(),
            signature: self.signature.clone(),
        }
    }
}

/// Drop whitespace and the surrounding parentheses.
fn normalize_signature(signature: &str) -> String
{
    let compact: String = signature.chars().filter(|c| !c.is_whitespace()).collect();
    let inner = compact
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(&compact);
    inner.to_string()
}

struct FunctionRecord
{
    key: FunctionKey,
    record: Record,
}

/// Owner of every function breakpoint.
pub struct FunctionBreakpoints
{
    runtime: Arc<dyn DebugRuntime>,
    symbols: Arc<dyn SymbolService>,
    just_my_code: AtomicBool,
    records: Mutex<HashMap<FunctionKey, FunctionRecord>>,
}

impl FunctionBreakpoints
{
    pub fn new(runtime: Arc<dyn DebugRuntime>, symbols: Arc<dyn SymbolService>, just_my_code: bool) -> Self
    {
        Self {
            runtime,
            symbols,
            just_my_code: AtomicBool::new(just_my_code),
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_just_my_code(&self, enabled: bool)
    {
        self.just_my_code.store(enabled, Ordering::SeqCst);
    }

    fn records(&self) -> MutexGuard<'_, HashMap<FunctionKey, FunctionRecord>>
    {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the whole set of function breakpoints.
    ///
    /// Requests equal to an existing record keep its identifier, hit count and
    /// bindings; records no longer requested are removed and their bindings
    /// deactivated. New records are bound in every loaded module right away.
    ///
    /// Results are in request order. Every request is stored even when binding
    /// one of them failed; the first failure is returned after all requests
    /// were processed.
    pub fn set(&self, requests: &[FunctionBreakpointRequest], ids: &IdAllocator) -> Result<Vec<Breakpoint>>
    {
        let modules = self.runtime.loaded_modules()?;
        let mut records = self.records();
        let mut previous = std::mem::take(&mut *records);
        let mut first_error = None;
        let mut results = Vec::with_capacity(requests.len());

        for request in requests {
            let key = request.key();
            if let Some(mut existing) = previous.remove(&key) {
                existing.record.update(request.condition.clone(), request.hit_condition);
                records.insert(key.clone(), existing);
            } else if let Some(existing) = records.get_mut(&key) {
                existing.record.update(request.condition.clone(), request.hit_condition);
            } else {
                let id = match ids.allocate() {
                    Ok(id) => id,
                    Err(err) => {
                        first_error.get_or_insert(err);
                        continue;
                    }
                };
                let mut entry = FunctionRecord {
                    key: key.clone(),
                    record: Record::new(id, request.condition.clone(), request.hit_condition),
                };
                for module in &modules {
                    keep_first(&mut first_error, self.bind_in_module(&mut entry, &**module));
                }
                tracing::debug!(id = %entry.record.id, name = %key.name, verified = entry.record.verified(), "function breakpoint added");
                records.insert(key.clone(), entry);
            }
            if let Some(entry) = records.get(&key) {
                results.push(entry.record.to_breakpoint(BreakpointKind::Function, key.location()));
            }
        }

        for (_, mut removed) in previous.drain() {
            tracing::debug!(id = %removed.record.id, "function breakpoint removed");
            keep_first(&mut first_error, removed.record.release_bindings());
        }
        drop(records);

        first_error.map_or(Ok(results), Err)
    }

    /// Bind `entry` to every matching method of `module` not bound yet.
    fn bind_in_module(&self, entry: &mut FunctionRecord, module: &dyn Module) -> Result<()>
    {
        if self.just_my_code.load(Ordering::SeqCst) && !self.symbols.has_symbols(module) {
            return Ok(());
        }
        if !entry.key.module.is_empty() && !module_matches(&entry.key.module, &module.name()?) {
            return Ok(());
        }
        let methods = match self.symbols.find_methods(module, &entry.key.name)? {
            SymbolLookup::NoSymbols => return Ok(()),
            SymbolLookup::Found(methods) => methods,
        };
        entry.record.resolved = true;

        for method in methods {
            if !entry.key.signature.is_empty() && normalize_signature(&method.signature) != entry.key.signature {
                continue;
            }
            let version = self.runtime.method_version(module, method.token)?;
            if entry.record.has_binding(module.module_id(), method.token, version) {
                continue;
            }
            let binding = Binding::create(self.runtime.as_ref(), module, method.token, 0, entry.record.enabled)?;
            tracing::trace!(id = %entry.record.id, method = %method.token, "function breakpoint bound");
            entry.record.bindings.push(binding);
        }
        Ok(())
    }

    /// Bind every record in a newly loaded module.
    fn bind_loaded(&self, module: &dyn Module) -> Result<Vec<BreakpointEvent>>
    {
        let mut records = self.records();
        let mut events = Vec::new();
        let mut first_error = None;
        for entry in records.values_mut() {
            let before = (entry.record.resolved, entry.record.bindings.len());
            keep_first(&mut first_error, self.bind_in_module(entry, module));
            if before != (entry.record.resolved, entry.record.bindings.len()) {
                events.push(BreakpointEvent {
                    reason: EventReason::Changed,
                    breakpoint: entry.record.to_breakpoint(BreakpointKind::Function, entry.key.location()),
                });
            }
        }
        first_error.map_or(Ok(events), Err)
    }
}

impl KindManager for FunctionBreakpoints
{
    fn kind(&self) -> BreakpointKind
    {
        BreakpointKind::Function
    }

    fn on_module_loaded(&self, module: &dyn Module) -> Result<Vec<BreakpointEvent>>
    {
        self.bind_loaded(module)
    }

    fn on_hot_reload(&self, module: &dyn Module, changed: &[MethodToken]) -> Result<Vec<BreakpointEvent>>
    {
        let mut records = self.records();
        let mut events = Vec::new();
        let mut first_error = None;
        for entry in records.values_mut() {
            let dropped = match entry.record.release_stale(module.module_id(), changed) {
                Ok(dropped) => dropped,
                Err(err) => {
                    first_error.get_or_insert(err);
                    1
                }
            };
            if dropped == 0 {
                continue;
            }
            keep_first(&mut first_error, self.bind_in_module(entry, module));
            events.push(BreakpointEvent {
                reason: EventReason::Changed,
                breakpoint: entry.record.to_breakpoint(BreakpointKind::Function, entry.key.location()),
            });
        }
        first_error.map_or(Ok(events), Err)
    }

    fn check_hit(&self, native: &dyn NativeBreakpoint) -> Option<HitCandidate>
    {
        let mut records = self.records();
        let entry = records.values_mut().find(|e| e.record.owns(native))?;
        if !entry.record.enabled {
            return None;
        }
        entry.record.record_hit();
        Some(HitCandidate {
            breakpoint: entry.record.to_breakpoint(BreakpointKind::Function, entry.key.location()),
        })
    }

    fn enable(&self, id: BreakpointId, enabled: bool) -> Result<bool>
    {
        let mut records = self.records();
        match records.values_mut().find(|e| e.record.id == id) {
            Some(entry) => entry.record.set_enabled(enabled).map(|()| true),
            None => Ok(false),
        }
    }

    fn enable_all(&self, enabled: bool) -> Result<()>
    {
        let mut first_error = None;
        for entry in self.records().values_mut() {
            keep_first(&mut first_error, entry.record.set_enabled(enabled));
        }
        first_error.map_or(Ok(()), Err)
    }

    fn delete_all(&self) -> Result<()>
    {
        let removed: Vec<_> = self.records().drain().map(|(_, e)| e).collect();
        release_all(removed.into_iter().flat_map(|mut e| std::mem::take(&mut e.record.bindings)))
    }

    fn snapshot(&self) -> Vec<Breakpoint>
    {
        let mut out: Vec<_> = self
            .records()
            .values()
            .map(|e| e.record.to_breakpoint(BreakpointKind::Function, e.key.location()))
            .collect();
        out.sort_by_key(|b| b.id);
        out
    }
}
