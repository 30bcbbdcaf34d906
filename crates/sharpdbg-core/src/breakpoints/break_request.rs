//! User pause requests and `Debugger.Break()` handling.
//!
//! A `Debugger.Break()` call inside a loop or a breakpoint callback that lands
//! on the position the thread already stopped at would report the same stop
//! twice; the last stop position filters that out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::Result;
use crate::runtime::Thread;
use crate::types::{FrameLevel, MethodToken, ModuleId, ThreadId};

/// Why a break callback stops the debuggee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakReason
{
    /// The user asked to pause.
    Pause,
    /// The debuggee called `Debugger.Break()`.
    Break,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StopPosition
{
    thread: ThreadId,
    module: ModuleId,
    method: MethodToken,
    il_offset: u32,
}

#[derive(Default)]
pub struct BreakRequest
{
    pause_requested: AtomicBool,
    last_stop: Mutex<Option<StopPosition>>,
}

impl BreakRequest
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    fn last_stop(&self) -> MutexGuard<'_, Option<StopPosition>>
    {
        self.last_stop.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn request_pause(&self)
    {
        self.pause_requested.store(true, Ordering::SeqCst);
    }

    /// Remember where `thread` is stopped now.
    pub fn set_last_stopped(&self, thread: &dyn Thread) -> Result<()>
    {
        let position = position_of(thread)?;
        *self.last_stop() = Some(position);
        Ok(())
    }

    /// Decide whether a break callback stops. `None` means the thread is
    /// still at the position it last stopped at.
    pub fn on_break(&self, thread: &dyn Thread) -> Result<Option<BreakReason>>
    {
        if self.pause_requested.swap(false, Ordering::SeqCst) {
            self.set_last_stopped(thread)?;
            return Ok(Some(BreakReason::Pause));
        }
        let position = position_of(thread)?;
        let mut last = self.last_stop();
        if *last == Some(position) {
            tracing::debug!(thread = %position.thread, il_offset = position.il_offset, "duplicate break ignored");
            return Ok(None);
        }
        *last = Some(position);
        Ok(Some(BreakReason::Break))
    }

    pub fn on_thread_exited(&self, thread: ThreadId)
    {
        let mut last = self.last_stop();
        if last.is_some_and(|p| p.thread == thread) {
            *last = None;
        }
    }

    pub fn reset(&self)
    {
        self.pause_requested.store(false, Ordering::SeqCst);
        *self.last_stop() = None;
    }
}

fn position_of(thread: &dyn Thread) -> Result<StopPosition>
{
    let frame = thread.frame(FrameLevel(0))?;
    Ok(StopPosition {
        thread: thread.thread_id(),
        module: frame.module()?.module_id(),
        method: frame.method(),
        il_offset: frame.il_offset()?,
    })
}
