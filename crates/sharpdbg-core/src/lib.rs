//! # sharpdbg-core
//!
//! Breakpoint resolution and expression evaluation for a managed-runtime
//! debugger.
//!
//! This crate sits between a debug-adapter front end and the runtime's
//! debugging API. It provides:
//! - Line, function and exception breakpoints that resolve lazily as modules
//!   load and rebind after a hot reload
//! - A stack machine that evaluates compiled C# expressions against a stopped
//!   thread, including property getters and method calls run in the debuggee
//! - Serialization of function evaluations with user cancellation
//!
//! ## Seams
//!
//! The runtime ([`runtime::DebugRuntime`]), the symbol reader
//! ([`symbols::SymbolService`]) and the expression compiler
//! ([`eval::ExpressionCompiler`]) are traits. `runtime::mock` implements all
//! three in memory for tests, behind the `mock` feature.

pub mod breakpoints;
pub mod config;
pub mod error;
pub mod eval;
pub mod runtime;
pub mod symbols;
pub mod types;

pub use breakpoints::{Breakpoint, BreakpointId, BreakpointKind, Breakpoints, HitOutcome};
pub use config::DebuggerOptions;
// Re-export commonly used types
pub use error::{DebuggerError, EvalError, Result};
pub use eval::{EvalStackMachine, EvalWaiter};
