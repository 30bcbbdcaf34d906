//! # Breakpoints
//!
//! Breakpoint bookkeeping for managed code.
//!
//! Front-end requests come in three caller-visible kinds (line, function,
//! exception), each owned by its own manager with its own lock. Two internal
//! singletons (the entry breakpoint and the break request) and the hot-reload
//! manager complete the set. [`Breakpoints`] is the facade over all of them:
//! it allocates identifiers and fans runtime callbacks out to the managers.
//!
//! ## Lifecycle of a request
//!
//! ```text
//! requested ──(module with symbols scanned)──► resolved ──(≥1 binding)──► verified
//!     ▲                                            │
//!     └──────────── hot reload drops bindings ◄────┘
//! ```
//!
//! A request whose module is not loaded yet is not an error: it stays
//! unresolved and is retried on every module load.
//!
//! ## Bindings
//!
//! A binding ties a request to one native breakpoint in one method version.
//! Dropping a binding deactivates its native breakpoint, so the runtime never
//! reports a hit for a record that no longer exists.

mod break_request;
mod coordinator;
mod entry;
mod exception;
mod function;
mod hot_reload;
mod line;
mod record;

use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

pub use break_request::{BreakReason, BreakRequest};
pub use coordinator::Breakpoints;
pub use entry::EntryBreakpoint;
pub use exception::{ExceptionBreakMode, ExceptionBreakpointRequest, ExceptionBreakpoints, ExceptionInfo, ExceptionStage};
pub use function::{FunctionBreakpointRequest, FunctionBreakpoints};
pub use hot_reload::{HotReload, UpdateHandler};
pub use line::{LineBreakpointRequest, LineBreakpoints};

use crate::error::{DebuggerError, Result};
use crate::runtime::{Module, NativeBreakpoint};
use crate::types::MethodToken;

/// Caller-visible breakpoint identifier.
///
/// Allocated once per request, never reused during the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakpointId(u32);

impl BreakpointId
{
    #[must_use]
    pub const fn from_raw(value: u32) -> Self
    {
        Self(value)
    }

    #[must_use]
    pub const fn raw(self) -> u32
    {
        self.0
    }
}

impl fmt::Display for BreakpointId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Monotonic identifier source shared by every kind.
#[derive(Debug)]
pub struct IdAllocator
{
    next: Mutex<u32>,
}

impl Default for IdAllocator
{
    fn default() -> Self
    {
        Self { next: Mutex::new(1) }
    }
}

impl IdAllocator
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Hand out the next identifier.
    ///
    /// # Errors
    ///
    /// [`DebuggerError::InvalidState`] once the identifier space is used up.
    pub fn allocate(&self) -> Result<BreakpointId>
    {
        let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
        let id = BreakpointId(*next);
        *next = next
            .checked_add(1)
            .ok_or_else(|| DebuggerError::InvalidState("breakpoint identifiers exhausted".to_string()))?;
        Ok(id)
    }
}

/// Kinds in enumeration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BreakpointKind
{
    Line,
    Function,
    Exception,
}

/// What a breakpoint is attached to, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointLocation
{
    /// `line` is the bound line once verified, the requested line before.
    Source
    {
        file: String,
        line: u32,
    },
    Function
    {
        module: Option<String>,
        name: String,
        signature: String,
    },
    Exception
    {
        type_name: String,
        mode: ExceptionBreakMode,
    },
}

/// Display record handed to the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint
{
    pub id: BreakpointId,
    pub kind: BreakpointKind,
    /// At least one concrete binding exists.
    pub verified: bool,
    /// At least one module with symbols was searched for the target.
    pub resolved: bool,
    pub enabled: bool,
    pub location: BreakpointLocation,
    pub hit_count: u32,
    pub condition: Option<String>,
    pub hit_condition: Option<HitCondition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventReason
{
    New,
    Changed,
    Removed,
}

/// Breakpoint state change reported after a runtime event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointEvent
{
    pub reason: EventReason,
    pub breakpoint: Breakpoint,
}

/// Result of a callback that touches several kinds.
///
/// A failure in one kind lands in `errors` without suppressing the others.
#[derive(Debug, Default)]
pub struct EventBatch
{
    pub events: Vec<BreakpointEvent>,
    pub errors: Vec<DebuggerError>,
}

impl EventBatch
{
    pub fn absorb(&mut self, result: Result<Vec<BreakpointEvent>>)
    {
        match result {
            Ok(events) => self.events.extend(events),
            Err(err) => self.push_error(err),
        }
    }

    pub fn push_error(&mut self, err: DebuggerError)
    {
        tracing::error!("breakpoint update failed: {err}");
        self.errors.push(err);
    }

    /// Events reported for one breakpoint.
    #[must_use]
    pub fn events_for(&self, id: BreakpointId) -> Vec<&BreakpointEvent>
    {
        self.events.iter().filter(|e| e.breakpoint.id == id).collect()
    }

    #[must_use]
    pub fn is_ok(&self) -> bool
    {
        self.errors.is_empty()
    }
}

/// What the debugger should do after a breakpoint callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HitOutcome
{
    /// Stop and report this breakpoint.
    Breakpoint(Breakpoint),
    /// The one-shot entry point breakpoint fired.
    EntryPoint,
    /// Continue: unknown breakpoint, false condition, or hit condition unmet.
    NoStop,
}

/// Hit-count policy of a breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitCondition
{
    Equal(u32),
    GreaterOrEqual(u32),
    Greater(u32),
    Less(u32),
    LessOrEqual(u32),
    /// Every N-th hit.
    Multiple(u32),
}

impl HitCondition
{
    #[must_use]
    pub const fn is_met(self, hit_count: u32) -> bool
    {
        match self {
            HitCondition::Equal(n) => hit_count == n,
            HitCondition::GreaterOrEqual(n) => hit_count >= n,
            HitCondition::Greater(n) => hit_count > n,
            HitCondition::Less(n) => hit_count < n,
            HitCondition::LessOrEqual(n) => hit_count <= n,
            HitCondition::Multiple(0) => false,
            HitCondition::Multiple(n) => hit_count % n == 0,
        }
    }
}

impl FromStr for HitCondition
{
    type Err = DebuggerError;

    fn from_str(s: &str) -> Result<Self>
    {
        let s = s.trim();
        let (operator, rest) = ["==", ">=", "<=", ">", "<", "%"]
            .into_iter()
            .find_map(|operator| s.strip_prefix(operator).map(|rest| (operator, rest)))
            .unwrap_or(("==", s));
        let n = rest
            .trim()
            .parse::<u32>()
            .map_err(|_| DebuggerError::InvalidArgument(format!("invalid hit condition '{s}'")))?;
        Ok(match operator {
            ">=" => HitCondition::GreaterOrEqual(n),
            "<=" => HitCondition::LessOrEqual(n),
            ">" => HitCondition::Greater(n),
            "<" => HitCondition::Less(n),
            "%" => HitCondition::Multiple(n),
            _ => HitCondition::Equal(n),
        })
    }
}

impl fmt::Display for HitCondition
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            HitCondition::Equal(n) => write!(f, "== {n}"),
            HitCondition::GreaterOrEqual(n) => write!(f, ">= {n}"),
            HitCondition::Greater(n) => write!(f, "> {n}"),
            HitCondition::Less(n) => write!(f, "< {n}"),
            HitCondition::LessOrEqual(n) => write!(f, "<= {n}"),
            HitCondition::Multiple(n) => write!(f, "% {n}"),
        }
    }
}

/// A hit matched to a record, before its condition was checked.
#[derive(Debug, Clone)]
pub struct HitCandidate
{
    /// Snapshot taken after the hit counter was incremented.
    pub breakpoint: Breakpoint,
}

/// Capabilities shared by the record-keeping kinds.
///
/// Line, function and exception managers implement this; the coordinator
/// dispatches on [`BreakpointKind`] through it.
pub trait KindManager: Send + Sync
{
    fn kind(&self) -> BreakpointKind;

    /// Try to bind unresolved or partially bound records in a new module.
    fn on_module_loaded(&self, module: &dyn Module) -> Result<Vec<BreakpointEvent>>;

    /// Drop bindings in methods whose body changed, then bind again.
    fn on_hot_reload(&self, module: &dyn Module, changed: &[MethodToken]) -> Result<Vec<BreakpointEvent>>;

    /// Identify the record owning `native`, counting the hit.
    fn check_hit(&self, native: &dyn NativeBreakpoint) -> Option<HitCandidate>;

    /// Returns `Ok(false)` when no record has this id.
    fn enable(&self, id: BreakpointId, enabled: bool) -> Result<bool>;

    fn enable_all(&self, enabled: bool) -> Result<()>;

    fn delete_all(&self) -> Result<()>;

    /// Display records sorted by id.
    fn snapshot(&self) -> Vec<Breakpoint>;
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_id_allocation_is_monotonic()
    {
        let ids = IdAllocator::new();
        assert_eq!(ids.allocate().unwrap().raw(), 1);
        assert_eq!(ids.allocate().unwrap().raw(), 2);
        assert_eq!(ids.allocate().unwrap(), BreakpointId::from_raw(3));
    }

    #[test]
    fn test_id_allocation_never_wraps()
    {
        let ids = IdAllocator {
            next: Mutex::new(u32::MAX - 1),
        };
        assert_eq!(ids.allocate().unwrap().raw(), u32::MAX - 1);
        assert!(matches!(ids.allocate(), Err(DebuggerError::InvalidState(_))));
        assert!(matches!(ids.allocate(), Err(DebuggerError::InvalidState(_))));
    }

    #[test]
    fn test_hit_condition_parse()
    {
        assert_eq!("3".parse::<HitCondition>().unwrap(), HitCondition::Equal(3));
        assert_eq!("== 3".parse::<HitCondition>().unwrap(), HitCondition::Equal(3));
        assert_eq!(">=2".parse::<HitCondition>().unwrap(), HitCondition::GreaterOrEqual(2));
        assert_eq!("> 2".parse::<HitCondition>().unwrap(), HitCondition::Greater(2));
        assert_eq!("% 4".parse::<HitCondition>().unwrap(), HitCondition::Multiple(4));
        assert!("often".parse::<HitCondition>().is_err());
    }

    #[test]
    fn test_hit_condition_policy()
    {
        assert!(HitCondition::Equal(2).is_met(2));
        assert!(!HitCondition::Equal(2).is_met(3));
        assert!(HitCondition::Multiple(3).is_met(6));
        assert!(!HitCondition::Multiple(3).is_met(7));
        assert!(!HitCondition::Multiple(0).is_met(0));
        assert!(HitCondition::Greater(1).is_met(2));
    }

    #[test]
    fn test_kind_order()
    {
        assert!(BreakpointKind::Line < BreakpointKind::Function);
        assert!(BreakpointKind::Function < BreakpointKind::Exception);
    }

    #[test]
    fn test_event_batch_keeps_errors()
    {
        let mut batch = EventBatch::default();
        batch.absorb(Err(DebuggerError::runtime("CreateBreakpoint", 0x8000_4005)));
        batch.absorb(Ok(Vec::new()));
        assert!(!batch.is_ok());
        assert_eq!(batch.errors.len(), 1);
    }
}
