//! Exception breakpoints: stop when an exception of a given type is thrown or
//! goes unhandled.
//!
//! These never bind to native breakpoints; the runtime reports every exception
//! and the filter runs here. A filter matches the thrown type or any of its
//! base classes, and `*` matches everything.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{Breakpoint, BreakpointEvent, BreakpointId, BreakpointKind, BreakpointLocation, HitCandidate, IdAllocator, KindManager};
use crate::error::Result;
use crate::runtime::{Module, NativeBreakpoint, Value};
use crate::types::{MethodToken, ThreadId};

/// Filter matching every exception type.
pub const ANY_EXCEPTION: &str = "*";

/// When an exception filter stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionBreakMode
{
    /// As soon as the exception is thrown, before any handler runs.
    Throw,
    /// Only when no handler caught it.
    Unhandled,
}

impl fmt::Display for ExceptionBreakMode
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            ExceptionBreakMode::Throw => f.write_str("always"),
            ExceptionBreakMode::Unhandled => f.write_str("unhandled"),
        }
    }
}

/// Where the runtime is in delivering an exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionStage
{
    /// Thrown; handlers have not been searched yet.
    FirstChance,
    /// No handler was found.
    Unhandled,
}

/// Front-end request for one exception filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionBreakpointRequest
{
    /// Fully qualified type name, or [`ANY_EXCEPTION`].
    pub type_name: String,
    pub mode: ExceptionBreakMode,
}

impl ExceptionBreakpointRequest
{
    #[must_use]
    pub fn new(type_name: &str, mode: ExceptionBreakMode) -> Self
    {
        Self {
            type_name: type_name.to_string(),
            mode,
        }
    }
}

/// Details of the exception a thread stopped on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionInfo
{
    pub type_name: String,
    pub message: Option<String>,
    pub stack_trace: Option<String>,
    pub break_mode: ExceptionBreakMode,
    /// Filter that caused the stop; `None` for the global unhandled policy.
    pub breakpoint: Option<BreakpointId>,
}

/// Outcome of matching one exception against the filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionMatch
{
    pub mode: ExceptionBreakMode,
    pub breakpoint: Option<Breakpoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ExceptionKey
{
    type_name: String,
    mode: ExceptionBreakMode,
}

struct ExceptionRecord
{
    id: BreakpointId,
    enabled: bool,
    hit_count: u32,
}

impl ExceptionRecord
{
    fn to_breakpoint(&self, key: &ExceptionKey) -> Breakpoint
    {
        Breakpoint {
            id: self.id,
            kind: BreakpointKind::Exception,
            verified: true,
            resolved: true,
            enabled: self.enabled,
            location: BreakpointLocation::Exception {
                type_name: key.type_name.clone(),
                mode: key.mode,
            },
            hit_count: self.hit_count,
            condition: None,
            hit_condition: None,
        }
    }
}

/// Owner of every exception filter and of the per-thread stop reasons.
pub struct ExceptionBreakpoints
{
    break_on_unhandled: AtomicBool,
    records: Mutex<HashMap<ExceptionKey, ExceptionRecord>>,
    stops: Mutex<HashMap<ThreadId, ExceptionMatch>>,
}

impl ExceptionBreakpoints
{
    #[must_use]
    pub fn new(break_on_unhandled: bool) -> Self
    {
        Self {
            break_on_unhandled: AtomicBool::new(break_on_unhandled),
            records: Mutex::new(HashMap::new()),
            stops: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_break_on_unhandled(&self, enabled: bool)
    {
        self.break_on_unhandled.store(enabled, Ordering::SeqCst);
    }

    fn records(&self) -> MutexGuard<'_, HashMap<ExceptionKey, ExceptionRecord>>
    {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stops(&self) -> MutexGuard<'_, HashMap<ThreadId, ExceptionMatch>>
    {
        self.stops.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the whole set of exception filters.
    ///
    /// # Errors
    ///
    /// Identifier exhaustion; the filters allocated before it stay in place.
    pub fn set(&self, requests: &[ExceptionBreakpointRequest], ids: &IdAllocator) -> Result<Vec<Breakpoint>>
    {
        let mut records = self.records();
        let mut previous = std::mem::take(&mut *records);
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            let key = ExceptionKey {
                type_name: request.type_name.trim().to_string(),
                mode: request.mode,
            };
            if let Some(existing) = previous.remove(&key) {
                records.insert(key.clone(), existing);
            }
            if !records.contains_key(&key) {
                let record = ExceptionRecord {
                    id: ids.allocate()?,
                    enabled: true,
                    hit_count: 0,
                };
                records.insert(key.clone(), record);
            }
            if let Some(record) = records.get(&key) {
                results.push(record.to_breakpoint(&key));
            }
        }
        Ok(results)
    }

    /// Decide whether an exception whose class chain (most derived first) is
    /// `chain` stops at `stage`, counting the hit on the matching filter.
    pub fn match_exception(&self, stage: ExceptionStage, chain: &[String]) -> Option<ExceptionMatch>
    {
        let mode = match stage {
            ExceptionStage::FirstChance => ExceptionBreakMode::Throw,
            ExceptionStage::Unhandled => ExceptionBreakMode::Unhandled,
        };
        let mut records = self.records();
        let matched = records
            .iter_mut()
            .filter(|(key, record)| {
                record.enabled
                    && key.mode == mode
                    && (key.type_name == ANY_EXCEPTION || chain.iter().any(|name| *name == key.type_name))
            })
            .min_by_key(|(_, record)| record.id);
        if let Some((key, record)) = matched {
            record.hit_count = record.hit_count.saturating_add(1);
            return Some(ExceptionMatch {
                mode,
                breakpoint: Some(record.to_breakpoint(key)),
            });
        }
        (stage == ExceptionStage::Unhandled && self.break_on_unhandled.load(Ordering::SeqCst)).then_some(ExceptionMatch {
            mode,
            breakpoint: None,
        })
    }

    pub fn record_stop(&self, thread: ThreadId, stop: ExceptionMatch)
    {
        self.stops().insert(thread, stop);
    }

    pub fn stop_for(&self, thread: ThreadId) -> Option<ExceptionMatch>
    {
        self.stops().get(&thread).cloned()
    }

    pub fn forget_thread(&self, thread: ThreadId)
    {
        self.stops().remove(&thread);
    }

    pub fn forget_all_threads(&self)
    {
        self.stops().clear();
    }
}

/// Names of the value's class and all its base classes, most derived first.
pub(crate) fn class_chain(value: &dyn Value) -> Result<Vec<String>>
{
    let mut chain = Vec::new();
    let mut class = value.class()?;
    while let Some(current) = class {
        chain.push(current.name()?);
        class = current.base_class()?;
    }
    Ok(chain)
}

impl KindManager for ExceptionBreakpoints
{
    fn kind(&self) -> BreakpointKind
    {
        BreakpointKind::Exception
    }

    fn on_module_loaded(&self, _module: &dyn Module) -> Result<Vec<BreakpointEvent>>
    {
        Ok(Vec::new())
    }

    fn on_hot_reload(&self, _module: &dyn Module, _changed: &[MethodToken]) -> Result<Vec<BreakpointEvent>>
    {
        Ok(Vec::new())
    }

    fn check_hit(&self, _native: &dyn NativeBreakpoint) -> Option<HitCandidate>
    {
        None
    }

    fn enable(&self, id: BreakpointId, enabled: bool) -> Result<bool>
    {
        let mut records = self.records();
        Ok(match records.values_mut().find(|r| r.id == id) {
            Some(record) => {
                record.enabled = enabled;
                true
            }
            None => false,
        })
    }

    fn enable_all(&self, enabled: bool) -> Result<()>
    {
        for record in self.records().values_mut() {
            record.enabled = enabled;
        }
        Ok(())
    }

    fn delete_all(&self) -> Result<()>
    {
        self.records().clear();
        Ok(())
    }

    fn snapshot(&self) -> Vec<Breakpoint>
    {
        let mut out: Vec<_> = self.records().iter().map(|(key, record)| record.to_breakpoint(key)).collect();
        out.sort_by_key(|b| b.id);
        out
    }
}
