//! # Evaluation Waiter
//!
//! Serializes managed-code execution in the debuggee.
//!
//! The runtime can run only one function evaluation at a time, and it reports
//! completion asynchronously through a callback on one of its own threads. The
//! waiter is the funnel every evaluation goes through:
//!
//! - [`EvalWaiter::enter`] claims the waiter for the calling OS thread. A
//!   second thread queues until the first one's [`EvalScope`] is dropped.
//!   The owning thread may enter again (a getter evaluated while resolving an
//!   outer expression), which nests instead of deadlocking.
//! - [`EvalWaiter::run`] starts one function evaluation and blocks until the
//!   runtime callback delivers the outcome through
//!   [`EvalWaiter::notify_eval_complete`].
//! - [`EvalWaiter::cancel`] aborts the current call chain. Every later
//!   `enter` or `run` from that chain, at any nesting depth, fails with
//!   [`DebuggerError::Cancelled`]. Requests queued at the time of the
//!   cancellation fail as well.
//!
//! There is no timeout: a blocked evaluation ends only on completion,
//! cancellation or [`EvalWaiter::shutdown`].
//!
//! `run` blocks the calling thread; do not call it from inside an async task.

use std::marker::PhantomData;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::error::{DebuggerError, Result};
use crate::runtime::FuncEvalOutcome;
use crate::types::ThreadId;

struct PendingEval
{
    thread: ThreadId,
    sender: oneshot::Sender<Result<FuncEvalOutcome>>,
}

#[derive(Default)]
struct WaiterState
{
    owner: Option<std::thread::ThreadId>,
    depth: usize,
    /// Bumped by every cancellation.
    generation: u64,
    /// Generation the current owner entered under.
    owner_generation: u64,
    pending: Option<PendingEval>,
    shutdown: bool,
}

/// Single-slot, reentrant evaluation funnel.
#[derive(Default)]
pub struct EvalWaiter
{
    state: Mutex<WaiterState>,
    released: Condvar,
}

/// Proof that the current thread owns the waiter.
///
/// Dropping the outermost scope hands the waiter to the next queued thread.
#[must_use = "the waiter is released as soon as the scope is dropped"]
pub struct EvalScope<'a>
{
    waiter: &'a EvalWaiter,
    generation: u64,
    // Ownership is per OS thread; keep the scope on it.
    _not_send: PhantomData<*const ()>,
}

impl EvalWaiter
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WaiterState>
    {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the waiter for the calling thread, waiting behind another owner.
    ///
    /// # Errors
    ///
    /// [`DebuggerError::Cancelled`] if the waiter was shut down, if the calling
    /// chain was cancelled, or if a cancellation happened while queued.
    pub fn enter(&self) -> Result<EvalScope<'_>>
    {
        let me = std::thread::current().id();
        let mut state = self.lock();
        if state.shutdown {
            return Err(DebuggerError::Cancelled);
        }

        if state.owner == Some(me) {
            if state.owner_generation != state.generation {
                tracing::debug!(depth = state.depth, "nested evaluation rejected: chain was cancelled");
                return Err(DebuggerError::Cancelled);
            }
            state.depth += 1;
            return Ok(EvalScope {
                waiter: self,
                generation: state.owner_generation,
                _not_send: PhantomData,
            });
        }

        let queued_at = state.generation;
        while state.owner.is_some() {
            state = self.released.wait(state).unwrap_or_else(PoisonError::into_inner);
            if state.shutdown || state.generation != queued_at {
                return Err(DebuggerError::Cancelled);
            }
        }

        state.owner = Some(me);
        state.owner_generation = state.generation;
        state.depth = 1;
        Ok(EvalScope {
            waiter: self,
            generation: state.generation,
            _not_send: PhantomData,
        })
    }

    /// Start one function evaluation with `begin` and wait for its outcome.
    ///
    /// `begin` must issue the runtime call; the runtime's completion callback
    /// must then call [`notify_eval_complete`](Self::notify_eval_complete) with
    /// the same `thread`.
    ///
    /// # Errors
    ///
    /// The error returned by `begin`, [`DebuggerError::Cancelled`] if the
    /// chain is (or gets) cancelled, or [`DebuggerError::InvalidState`] if an
    /// evaluation is already in flight.
    pub fn run<F>(&self, scope: &EvalScope<'_>, thread: ThreadId, begin: F) -> Result<FuncEvalOutcome>
    where
        F: FnOnce() -> Result<()>,
    {
        let receiver = {
            let mut state = self.lock();
            if state.shutdown || state.generation != scope.generation {
                return Err(DebuggerError::Cancelled);
            }
            if let Some(pending) = &state.pending {
                return Err(DebuggerError::InvalidState(format!(
                    "function evaluation already in flight on thread {}",
                    pending.thread
                )));
            }
            let (sender, receiver) = oneshot::channel();
            state.pending = Some(PendingEval { thread, sender });
            receiver
        };

        tracing::trace!(%thread, "starting function evaluation");
        if let Err(err) = begin() {
            self.lock().pending = None;
            return Err(err);
        }

        receiver.blocking_recv().unwrap_or(Err(DebuggerError::Cancelled))
    }

    /// Deliver the runtime's eval-complete callback.
    ///
    /// Returns `false` (dropping `outcome`) when no evaluation is waiting for
    /// `thread`, e.g. the completion of an evaluation that was cancelled.
    pub fn notify_eval_complete(&self, thread: ThreadId, outcome: FuncEvalOutcome) -> bool
    {
        let pending = {
            let mut state = self.lock();
            match &state.pending {
                Some(pending) if pending.thread == thread => state.pending.take(),
                _ => None,
            }
        };
        match pending {
            Some(pending) => {
                tracing::trace!(%thread, "function evaluation completed");
                // The waiting side may already be gone after a cancellation.
                let _ = pending.sender.send(Ok(outcome));
                true
            }
            None => {
                tracing::debug!(%thread, "ignoring completion of an evaluation nobody waits for");
                false
            }
        }
    }

    /// Cancel the current call chain and every queued request.
    ///
    /// Returns whether a function evaluation was in flight.
    pub fn cancel(&self) -> bool
    {
        let pending = {
            let mut state = self.lock();
            state.generation += 1;
            state.pending.take()
        };
        self.released.notify_all();
        match pending {
            Some(pending) => {
                tracing::info!(thread = %pending.thread, "cancelling function evaluation");
                let _ = pending.sender.send(Err(DebuggerError::Cancelled));
                true
            }
            None => false,
        }
    }

    /// Cancel everything and refuse all later requests.
    pub fn shutdown(&self)
    {
        self.lock().shutdown = true;
        self.cancel();
    }

    /// Whether a function evaluation is waiting for its completion callback.
    pub fn is_evaluating(&self) -> bool
    {
        self.lock().pending.is_some()
    }
}

impl EvalScope<'_>
{
    /// Whether this scope's chain has been cancelled.
    pub fn is_cancelled(&self) -> bool
    {
        let state = self.waiter.lock();
        state.shutdown || state.generation != self.generation
    }

    /// `Err(Cancelled)` once the chain has been cancelled.
    ///
    /// # Errors
    ///
    /// [`DebuggerError::Cancelled`].
    pub fn check(&self) -> Result<()>
    {
        if self.is_cancelled() {
            Err(DebuggerError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Drop for EvalScope<'_>
{
    fn drop(&mut self)
    {
        let mut state = self.waiter.lock();
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.owner = None;
            drop(state);
            self.waiter.released.notify_all();
        }
    }
}
