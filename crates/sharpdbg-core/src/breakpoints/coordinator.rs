//! The [`Breakpoints`] facade.

use std::sync::Arc;

use super::exception::class_chain;
use super::{
    BreakReason, Breakpoint, BreakpointId, BreakRequest, EntryBreakpoint, EventBatch, ExceptionBreakpointRequest,
    ExceptionBreakpoints, ExceptionInfo, ExceptionStage, FunctionBreakpointRequest, FunctionBreakpoints, HitCandidate, HitOutcome,
    HotReload, IdAllocator, KindManager, LineBreakpointRequest, LineBreakpoints,
};
use crate::config::DebuggerOptions;
use crate::error::{DebuggerError, Result};
use crate::eval::{EvalStackMachine, CORE_LIBRARY};
use crate::runtime::{DebugRuntime, Module, NativeBreakpoint, Thread, Value};
use crate::symbols::SymbolService;
use crate::types::{EvalFlags, FrameLevel, MethodToken, PrimitiveValue, ThreadId, TypeToken};

/// Every breakpoint of one debugging session.
///
/// Front-end requests and runtime callbacks may arrive on different threads.
/// Each manager guards its own records; conditions are evaluated after the
/// owning manager released its lock, so a condition that runs debuggee code
/// never blocks requests for other breakpoints.
pub struct Breakpoints
{
    ids: IdAllocator,
    machine: Arc<EvalStackMachine>,
    eval_flags: EvalFlags,
    line: LineBreakpoints,
    function: FunctionBreakpoints,
    exception: ExceptionBreakpoints,
    entry: EntryBreakpoint,
    break_request: BreakRequest,
    hot_reload: HotReload,
}

impl Breakpoints
{
    pub fn new(
        runtime: Arc<dyn DebugRuntime>,
        symbols: Arc<dyn SymbolService>,
        machine: Arc<EvalStackMachine>,
        options: &DebuggerOptions,
    ) -> Self
    {
        Self {
            ids: IdAllocator::new(),
            machine,
            eval_flags: options.eval_flags,
            line: LineBreakpoints::new(Arc::clone(&runtime), Arc::clone(&symbols), options.just_my_code),
            function: FunctionBreakpoints::new(Arc::clone(&runtime), Arc::clone(&symbols), options.just_my_code),
            exception: ExceptionBreakpoints::new(options.break_on_unhandled),
            entry: EntryBreakpoint::new(Arc::clone(&runtime), options.stop_at_entry),
            break_request: BreakRequest::new(),
            hot_reload: HotReload::new(runtime, symbols),
        }
    }

    /// The evaluator used for breakpoint conditions.
    #[must_use]
    pub fn evaluator(&self) -> &Arc<EvalStackMachine>
    {
        &self.machine
    }

    /// Managers in enumeration order.
    fn managers(&self) -> [&dyn KindManager; 3]
    {
        [&self.line, &self.function, &self.exception]
    }

    // -- options -------------------------------------------------------------

    /// Applies to bindings made from now on; existing bindings stay.
    pub fn set_just_my_code(&self, enabled: bool)
    {
        self.line.set_just_my_code(enabled);
        self.function.set_just_my_code(enabled);
    }

    pub fn set_stop_at_entry(&self, enabled: bool) -> Result<()>
    {
        self.entry.set_stop_at_entry(enabled)
    }

    pub fn set_break_on_unhandled(&self, enabled: bool)
    {
        self.exception.set_break_on_unhandled(enabled);
    }

    // -- front-end requests --------------------------------------------------

    /// Replace the line breakpoints of `file`. Results are in request order.
    ///
    /// # Errors
    ///
    /// The first runtime or symbol failure; every request is still stored and
    /// retried on the next module load.
    pub fn set_line_breakpoints(&self, file: &str, requests: &[LineBreakpointRequest]) -> Result<Vec<Breakpoint>>
    {
        self.line.set(file, requests, &self.ids)
    }

    /// Replace every function breakpoint. Results are in request order.
    ///
    /// # Errors
    ///
    /// Same as [`set_line_breakpoints`](Self::set_line_breakpoints).
    pub fn set_function_breakpoints(&self, requests: &[FunctionBreakpointRequest]) -> Result<Vec<Breakpoint>>
    {
        self.function.set(requests, &self.ids)
    }

    /// Replace every exception filter. Results are in request order.
    ///
    /// # Errors
    ///
    /// Identifier exhaustion.
    pub fn set_exception_breakpoints(&self, requests: &[ExceptionBreakpointRequest]) -> Result<Vec<Breakpoint>>
    {
        self.exception.set(requests, &self.ids)
    }

    /// Enable or disable one breakpoint of any kind.
    ///
    /// # Errors
    ///
    /// [`DebuggerError::BreakpointIdNotFound`] for an unknown id, or the
    /// activation failure of one of its bindings.
    pub fn enable(&self, id: BreakpointId, enabled: bool) -> Result<()>
    {
        for manager in self.managers() {
            if manager.enable(id, enabled)? {
                tracing::debug!(%id, enabled, "breakpoint toggled");
                return Ok(());
            }
        }
        Err(DebuggerError::BreakpointIdNotFound(id.raw()))
    }

    /// Enable or disable every breakpoint; all kinds are attempted.
    pub fn enable_all(&self, enabled: bool) -> Result<()>
    {
        let mut first_error = None;
        for manager in self.managers() {
            if let Err(err) = manager.enable_all(enabled) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Remove every breakpoint, including a pending entry breakpoint.
    pub fn delete_all(&self) -> Result<()>
    {
        let mut first_error = None;
        for manager in self.managers() {
            if let Err(err) = manager.delete_all() {
                first_error.get_or_insert(err);
            }
        }
        if let Err(err) = self.entry.delete() {
            first_error.get_or_insert(err);
        }
        tracing::debug!("all breakpoints deleted");
        first_error.map_or(Ok(()), Err)
    }

    /// Visit every breakpoint ordered by kind, then id. The visitor returns
    /// `false` to stop early.
    pub fn enumerate_breakpoints<F>(&self, mut visitor: F)
    where
        F: FnMut(&Breakpoint) -> bool,
    {
        for manager in self.managers() {
            for breakpoint in manager.snapshot() {
                if !visitor(&breakpoint) {
                    return;
                }
            }
        }
    }

    #[must_use]
    pub fn breakpoints(&self) -> Vec<Breakpoint>
    {
        let mut all = Vec::new();
        self.enumerate_breakpoints(|bp| {
            all.push(bp.clone());
            true
        });
        all
    }

    // -- runtime callbacks ---------------------------------------------------

    /// Bind pending breakpoints in a freshly loaded module.
    ///
    /// Loading the core library also discovers the predefined types the
    /// evaluator needs.
    pub fn on_module_loaded(&self, module: &dyn Module) -> EventBatch
    {
        let mut batch = EventBatch::default();
        match module.name() {
            Ok(name) => {
                tracing::debug!(module = %name, "module loaded");
                if name.eq_ignore_ascii_case(CORE_LIBRARY) && !self.machine.predefined_types_ready() {
                    if let Err(err) = self.machine.find_predefined_types(module) {
                        batch.push_error(err);
                    }
                }
            }
            Err(err) => batch.push_error(err),
        }
        if let Err(err) = self.entry.on_module_loaded(module) {
            batch.push_error(err);
        }
        for manager in self.managers() {
            batch.absorb(manager.on_module_loaded(module));
        }
        batch
    }

    /// Decide whether a native breakpoint hit stops the debuggee.
    ///
    /// The hit counter of the matching record goes up first; the condition is
    /// evaluated next and the hit condition last. A condition that fails to
    /// evaluate stops, so the user sees why.
    pub fn on_breakpoint_hit(&self, thread: &dyn Thread, native: &dyn NativeBreakpoint) -> Result<HitOutcome>
    {
        if self.machine.waiter().is_evaluating() {
            tracing::debug!(thread = %thread.thread_id(), "breakpoint hit during evaluation ignored");
            return Ok(HitOutcome::NoStop);
        }
        if self.entry.check_hit(native)? {
            self.break_request.set_last_stopped(thread)?;
            return Ok(HitOutcome::EntryPoint);
        }
        if self.hot_reload.check_hit(native)? {
            self.hot_reload.notify_application(&self.machine, thread, self.eval_flags)?;
            return Ok(HitOutcome::NoStop);
        }

        let candidate: Option<HitCandidate> = [&self.line as &dyn KindManager, &self.function]
            .into_iter()
            .find_map(|manager| manager.check_hit(native));
        let Some(HitCandidate { breakpoint }) = candidate else {
            return Ok(HitOutcome::NoStop);
        };

        if !self.condition_holds(thread, &breakpoint) {
            return Ok(HitOutcome::NoStop);
        }
        if let Some(hit_condition) = breakpoint.hit_condition {
            if !hit_condition.is_met(breakpoint.hit_count) {
                return Ok(HitOutcome::NoStop);
            }
        }

        self.break_request.set_last_stopped(thread)?;
        tracing::info!(id = %breakpoint.id, hit_count = breakpoint.hit_count, "breakpoint hit");
        Ok(HitOutcome::Breakpoint(breakpoint))
    }

    fn condition_holds(&self, thread: &dyn Thread, breakpoint: &Breakpoint) -> bool
    {
        let Some(condition) = breakpoint.condition.as_deref() else {
            return true;
        };
        let value = self
            .machine
            .evaluate_expression(thread, FrameLevel(0), self.eval_flags, condition)
            .and_then(|result| result.value.read());
        match value {
            Ok(PrimitiveValue::Bool(holds)) => holds,
            Ok(other) => {
                tracing::warn!(id = %breakpoint.id, condition, "condition is not boolean ({other}), stopping");
                true
            }
            Err(err) => {
                tracing::warn!(id = %breakpoint.id, condition, "condition evaluation failed, stopping: {err}");
                true
            }
        }
    }

    /// Decide whether an exception stops the thread; the details of a stop
    /// are returned.
    pub fn on_exception(&self, thread: &dyn Thread, stage: ExceptionStage) -> Result<Option<ExceptionInfo>>
    {
        if self.machine.waiter().is_evaluating() {
            return Ok(None);
        }
        let Some(exception) = thread.current_exception()? else {
            return Ok(None);
        };
        let chain = class_chain(&*exception)?;
        drop(exception);
        let Some(stop) = self.exception.match_exception(stage, &chain) else {
            return Ok(None);
        };
        self.exception.record_stop(thread.thread_id(), stop);
        self.break_request.set_last_stopped(thread)?;
        self.get_exception_info(thread).map(Some)
    }

    /// Details of the exception `thread` is stopped on.
    ///
    /// # Errors
    ///
    /// [`DebuggerError::InvalidState`] when the thread did not stop on an
    /// exception, or failures reading the exception object.
    pub fn get_exception_info(&self, thread: &dyn Thread) -> Result<ExceptionInfo>
    {
        let not_stopped = || DebuggerError::InvalidState(format!("thread {} is not stopped on an exception", thread.thread_id()));
        let stop = self.exception.stop_for(thread.thread_id()).ok_or_else(not_stopped)?;
        let exception = thread.current_exception()?.ok_or_else(not_stopped)?;
        let class = exception
            .class()?
            .ok_or_else(|| DebuggerError::InvalidState("exception object has no class".to_string()))?;
        let type_name = class.name()?;
        Ok(ExceptionInfo {
            type_name,
            message: self.read_text(thread, &*exception, &["Message", "_message"])?,
            stack_trace: self.read_text(thread, &*exception, &["StackTrace", "_stackTraceString"])?,
            break_mode: stop.mode,
            breakpoint: stop.breakpoint.map(|bp| bp.id),
        })
    }

    /// First member of `names` the exception has, as text.
    fn read_text(&self, thread: &dyn Thread, exception: &dyn Value, names: &[&str]) -> Result<Option<String>>
    {
        for name in names {
            if let Some(value) = self.machine.read_member(thread, self.eval_flags, exception, name)? {
                return Ok(match value.read()? {
                    PrimitiveValue::String(text) => Some(text),
                    _ => None,
                });
            }
        }
        Ok(None)
    }

    pub fn request_pause(&self)
    {
        self.break_request.request_pause();
    }

    /// `None` when the thread is still where it last stopped.
    pub fn on_break(&self, thread: &dyn Thread) -> Result<Option<BreakReason>>
    {
        self.break_request.on_break(thread)
    }

    pub fn set_last_stopped(&self, thread: &dyn Thread) -> Result<()>
    {
        self.break_request.set_last_stopped(thread)
    }

    pub fn on_thread_exited(&self, thread: ThreadId)
    {
        self.exception.forget_thread(thread);
        self.break_request.on_thread_exited(thread);
    }

    /// Delete every breakpoint and forget the stop state of the exited
    /// debuggee. Every part is attempted; the first failure is returned.
    pub fn on_process_exited(&self) -> Result<()>
    {
        let deleted = self.delete_all();
        self.break_request.reset();
        self.exception.forget_all_threads();
        let reset = self.hot_reload.reset();
        tracing::info!("process exited, breakpoint state cleared");
        deleted.and(reset)
    }

    // -- hot reload ----------------------------------------------------------

    /// Rebind after a delta changed `changed` in `module`.
    pub fn on_hot_reload_applied(&self, module: &dyn Module, changed: &[MethodToken]) -> EventBatch
    {
        self.hot_reload.apply(module, changed, &self.managers())
    }

    /// Record the types a delta updated in `module` and arm the application
    /// reload: the first thread entering one of `methods` runs the
    /// application's update handlers without stopping.
    ///
    /// # Errors
    ///
    /// The first failure placing an internal breakpoint.
    pub fn set_hot_reload_breakpoint(&self, module: &dyn Module, types: &[TypeToken], methods: &[MethodToken]) -> Result<()>
    {
        self.hot_reload.arm(module, types, methods)
    }

    pub fn record_updated_types(&self, module: &str, types: &[TypeToken])
    {
        self.hot_reload.record_updated_types(module, types);
    }

    pub fn take_updated_types(&self) -> Vec<(String, Vec<TypeToken>)>
    {
        self.hot_reload.take_updated_types()
    }
}
