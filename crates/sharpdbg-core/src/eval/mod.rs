//! # Expression Evaluation
//!
//! Evaluates user expressions against a stopped thread.
//!
//! ## Architecture
//!
//! ```text
//! expression text
//!       │  ExpressionCompiler (external)
//!       ▼
//! StackProgram ──► EvalStackMachine ──► DebugRuntime (read / write / func eval)
//!                        │                     ▲
//!                        ├─► OperatorEvaluator │
//!                        └─► EvalWaiter ───────┘ (one func eval at a time)
//! ```
//!
//! - [`program`]: instruction set and the compiler seam
//! - [`machine`]: the stack machine itself
//! - [`entry`]: evaluation stack slots
//! - [`context`]: per-evaluation state and predefined classes
//! - [`operators`]: operator and conversion semantics
//! - [`waiter`]: serialization of function evaluations

pub mod context;
pub mod entry;
pub mod machine;
pub mod operators;
pub mod program;
pub mod waiter;

pub use context::{EvalContext, PredefinedTypes, CORE_LIBRARY};
pub use entry::{Editability, EvalStackEntry, ResetLiteral, SetterData};
pub use machine::{EvalStackMachine, EvaluationResult};
pub use operators::{ConversionKind, NumericOperators, OperatorEvaluator};
pub use program::{BinaryOp, ExpressionCompiler, Instruction, StackProgram, UnaryOp};
pub use waiter::{EvalScope, EvalWaiter};
