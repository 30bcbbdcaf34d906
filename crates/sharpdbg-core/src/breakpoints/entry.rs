//! One-shot breakpoint at the program's entry point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::record::Binding;
use crate::error::Result;
use crate::runtime::{DebugRuntime, Module, NativeBreakpoint};

#[derive(Default)]
struct EntryState
{
    binding: Option<Binding>,
    /// Set once the entry module was seen; the breakpoint is never placed twice.
    placed: bool,
}

/// Stop-at-entry support.
pub struct EntryBreakpoint
{
    runtime: Arc<dyn DebugRuntime>,
    stop_at_entry: AtomicBool,
    state: Mutex<EntryState>,
}

impl EntryBreakpoint
{
    pub fn new(runtime: Arc<dyn DebugRuntime>, stop_at_entry: bool) -> Self
    {
        Self {
            runtime,
            stop_at_entry: AtomicBool::new(stop_at_entry),
            state: Mutex::new(EntryState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, EntryState>
    {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Turning the option off removes a breakpoint that was placed but not hit.
    pub fn set_stop_at_entry(&self, enabled: bool) -> Result<()>
    {
        self.stop_at_entry.store(enabled, Ordering::SeqCst);
        if enabled {
            return Ok(());
        }
        let binding = self.state().binding.take();
        binding.map_or(Ok(()), Binding::release)
    }

    /// Place the breakpoint if `module` carries the entry point.
    pub fn on_module_loaded(&self, module: &dyn Module) -> Result<()>
    {
        if !self.stop_at_entry.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut state = self.state();
        if state.placed {
            return Ok(());
        }
        let Some(entry) = module.entry_point()? else {
            return Ok(());
        };
        let binding = Binding::create(self.runtime.as_ref(), module, entry, 0, true)?;
        tracing::info!(method = %entry, "entry breakpoint placed");
        state.binding = Some(binding);
        state.placed = true;
        Ok(())
    }

    /// Whether `native` is the entry breakpoint; a hit removes it.
    pub fn check_hit(&self, native: &dyn NativeBreakpoint) -> Result<bool>
    {
        let binding = {
            let mut state = self.state();
            match state.binding.take() {
                Some(binding) if binding.owns(native) => binding,
                other => {
                    state.binding = other;
                    return Ok(false);
                }
            }
        };
        binding.release()?;
        Ok(true)
    }

    pub fn delete(&self) -> Result<()>
    {
        let binding = self.state().binding.take();
        binding.map_or(Ok(()), Binding::release)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::runtime::mock::MockRuntime;

    #[test]
    fn test_one_shot_at_entry()
    {
        let runtime = Arc::new(MockRuntime::new());
        let entry = EntryBreakpoint::new(runtime.clone(), true);
        let lib = runtime.load_module("Lib.dll");
        entry.on_module_loaded(&*lib).unwrap();
        assert!(runtime.active_breakpoints().is_empty());

        let app = runtime.load_entry_module("App.dll", 0x0600_0001);
        entry.on_module_loaded(&*app).unwrap();
        let native = runtime.active_breakpoint_at(app.id(), 0x0600_0001, 0).unwrap();
        assert!(entry.check_hit(&*native).unwrap());
        assert!(runtime.active_breakpoints().is_empty());
        assert!(!entry.check_hit(&*native).unwrap());

        entry.on_module_loaded(&*app).unwrap();
        assert!(runtime.active_breakpoints().is_empty());
    }

    #[test]
    fn test_disabled_option_places_nothing()
    {
        let runtime = Arc::new(MockRuntime::new());
        let entry = EntryBreakpoint::new(runtime.clone(), false);
        let app = runtime.load_entry_module("App.dll", 0x0600_0001);
        entry.on_module_loaded(&*app).unwrap();
        assert!(runtime.active_breakpoints().is_empty());
    }

    #[test]
    fn test_turning_off_removes_pending_breakpoint()
    {
        let runtime = Arc::new(MockRuntime::new());
        let entry = EntryBreakpoint::new(runtime.clone(), true);
        let app = runtime.load_entry_module("App.dll", 0x0600_0001);
        entry.on_module_loaded(&*app).unwrap();
        entry.set_stop_at_entry(false).unwrap();
        assert!(runtime.active_breakpoints().is_empty());
    }
}
