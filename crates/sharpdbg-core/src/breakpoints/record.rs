//! Record and binding types shared by the line and function managers.

use super::{Breakpoint, BreakpointId, BreakpointKind, BreakpointLocation, HitCondition};
use crate::error::{log_failure, Result};
use crate::runtime::{DebugRuntime, Handle, Module, NativeBreakpoint};
use crate::types::{MethodToken, ModuleId};

/// One native breakpoint placed on behalf of a record.
///
/// Dropping a binding deactivates the native breakpoint. Use
/// [`Binding::release`] where the caller needs to see a deactivation failure.
pub(crate) struct Binding
{
    pub module: ModuleId,
    pub method: MethodToken,
    pub version: u32,
    pub il_offset: u32,
    /// Source line the binding landed on (line breakpoints only).
    pub line: Option<u32>,
    native: Handle<dyn NativeBreakpoint>,
    released: bool,
}

impl Binding
{
    /// Place a native breakpoint at `il_offset` of the current version of
    /// `method` and set its activation state.
    pub fn create(runtime: &dyn DebugRuntime, module: &dyn Module, method: MethodToken, il_offset: u32, active: bool) -> Result<Self>
    {
        let version = runtime.method_version(module, method)?;
        let native = runtime
            .create_breakpoint(module, method, il_offset)
            .map_err(log_failure("create native breakpoint"))?;
        native.activate(active).map_err(log_failure("activate new binding"))?;
        Ok(Self {
            module: module.module_id(),
            method,
            version,
            il_offset,
            line: None,
            native,
            released: false,
        })
    }

    #[must_use]
    pub fn with_line(mut self, line: u32) -> Self
    {
        self.line = Some(line);
        self
    }

    pub fn owns(&self, native: &dyn NativeBreakpoint) -> bool
    {
        self.native.same_object(native)
    }

    pub fn set_active(&self, active: bool) -> Result<()>
    {
        self.native.activate(active).map_err(log_failure("toggle binding"))
    }

    /// Deactivate and drop, reporting a deactivation failure.
    pub fn release(mut self) -> Result<()>
    {
        self.released = true;
        self.native.activate(false).map_err(log_failure("deactivate binding"))
    }
}

impl Drop for Binding
{
    fn drop(&mut self)
    {
        if !self.released {
            if let Err(err) = self.native.activate(false) {
                tracing::error!(method = %self.method, "failed to deactivate dropped binding: {err}");
            }
        }
    }
}

/// State common to line and function records.
pub(crate) struct Record
{
    pub id: BreakpointId,
    pub enabled: bool,
    pub resolved: bool,
    pub condition: Option<String>,
    pub hit_condition: Option<HitCondition>,
    pub hit_count: u32,
    pub bindings: Vec<Binding>,
}

impl Record
{
    pub fn new(id: BreakpointId, condition: Option<String>, hit_condition: Option<HitCondition>) -> Self
    {
        Self {
            id,
            enabled: true,
            resolved: false,
            condition: condition.filter(|c| !c.trim().is_empty()),
            hit_condition,
            hit_count: 0,
            bindings: Vec::new(),
        }
    }

    pub fn verified(&self) -> bool
    {
        !self.bindings.is_empty()
    }

    /// Replace the condition parts of a re-sent request. Identity, bindings
    /// and the hit counter stay.
    pub fn update(&mut self, condition: Option<String>, hit_condition: Option<HitCondition>)
    {
        self.condition = condition.filter(|c| !c.trim().is_empty());
        self.hit_condition = hit_condition;
    }

    pub fn has_binding(&self, module: ModuleId, method: MethodToken, version: u32) -> bool
    {
        self.bindings
            .iter()
            .any(|b| b.module == module && b.method == method && b.version == version)
    }

    pub fn owns(&self, native: &dyn NativeBreakpoint) -> bool
    {
        self.bindings.iter().any(|b| b.owns(native))
    }

    /// Activate or deactivate every binding, attempting all of them.
    pub fn set_enabled(&mut self, enabled: bool) -> Result<()>
    {
        self.enabled = enabled;
        let mut first_error = None;
        for binding in &self.bindings {
            if let Err(err) = binding.set_active(enabled) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Release every binding, attempting all of them.
    pub fn release_bindings(&mut self) -> Result<()>
    {
        release_all(self.bindings.drain(..))
    }

    /// Release the bindings in `module` whose method is in `changed`.
    ///
    /// Returns how many were dropped.
    pub fn release_stale(&mut self, module: ModuleId, changed: &[MethodToken]) -> Result<usize>
    {
        let (stale, kept): (Vec<_>, Vec<_>) = self
            .bindings
            .drain(..)
            .partition(|b| b.module == module && changed.contains(&b.method));
        self.bindings = kept;
        let count = stale.len();
        release_all(stale.into_iter())?;
        Ok(count)
    }

    /// Count a hit. The caller checks condition and hit condition afterwards.
    pub fn record_hit(&mut self)
    {
        self.hit_count = self.hit_count.saturating_add(1);
    }

    pub fn to_breakpoint(&self, kind: BreakpointKind, location: BreakpointLocation) -> Breakpoint
    {
        Breakpoint {
            id: self.id,
            kind,
            verified: self.verified(),
            resolved: self.resolved,
            enabled: self.enabled,
            location,
            hit_count: self.hit_count,
            condition: self.condition.clone(),
            hit_condition: self.hit_condition,
        }
    }
}

pub(crate) fn release_all(bindings: impl Iterator<Item = Binding>) -> Result<()>
{
    let mut first_error = None;
    for binding in bindings {
        if let Err(err) = binding.release() {
            first_error.get_or_insert(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Keep the first error while continuing with the remaining work.
pub(crate) fn keep_first(slot: &mut Option<crate::error::DebuggerError>, result: Result<()>)
{
    if let Err(err) = result {
        slot.get_or_insert(err);
    }
}

/// Module names match with or without the file extension, ignoring case.
pub(crate) fn module_matches(requested: &str, loaded: &str) -> bool
{
    fn stem(name: &str) -> String
    {
        let file = name.rsplit(['/', '\\']).next().unwrap_or(name).to_ascii_lowercase();
        match file.strip_suffix(".dll").or_else(|| file.strip_suffix(".exe")) {
            Some(stem) => stem.to_string(),
            None => file,
        }
    }
    stem(requested) == stem(loaded)
}

#[cfg(test)]
mod tests
{
    use std::sync::Arc;

    use super::*;
    use crate::runtime::mock::MockRuntime;

    #[test]
    fn test_module_name_matching()
    {
        assert!(module_matches("App", "App.dll"));
        assert!(module_matches("app.dll", "App.dll"));
        assert!(module_matches("App.dll", "/bin/App.dll"));
        assert!(!module_matches("Lib", "App.dll"));
    }

    #[test]
    fn test_dropped_binding_deactivates()
    {
        let runtime = Arc::new(MockRuntime::new());
        let module = runtime.load_module("App.dll");
        let binding = Binding::create(&*runtime, &*module, MethodToken(0x0600_0001), 0, true).unwrap();
        assert_eq!(runtime.active_breakpoints().len(), 1);
        drop(binding);
        assert!(runtime.active_breakpoints().is_empty());
        assert_eq!(runtime.outstanding_refs(), 0);
    }

    #[test]
    fn test_release_reports_failure()
    {
        let runtime = Arc::new(MockRuntime::new());
        let module = runtime.load_module("App.dll");
        let binding = Binding::create(&*runtime, &*module, MethodToken(0x0600_0001), 0, true).unwrap();
        runtime.fail_on("Activate");
        assert!(binding.release().is_err());
    }

    #[test]
    fn test_stale_bindings_are_released()
    {
        let runtime = Arc::new(MockRuntime::new());
        let module = runtime.load_module("App.dll");
        let mut record = Record::new(BreakpointId::from_raw(1), None, None);
        for method in [1, 2] {
            let binding = Binding::create(&*runtime, &*module, MethodToken(0x0600_0000 + method), 0, true).unwrap();
            record.bindings.push(binding);
        }
        let dropped = record.release_stale(module.id(), &[MethodToken(0x0600_0002)]).unwrap();
        assert_eq!(dropped, 1);
        assert_eq!(record.bindings.len(), 1);
        assert_eq!(runtime.active_breakpoints().len(), 1);
    }

    #[test]
    fn test_empty_condition_is_dropped()
    {
        let record = Record::new(BreakpointId::from_raw(1), Some("  ".into()), None);
        assert!(record.condition.is_none());
    }
}
