//! # Error Types
//!
//! General error handling for the breakpoint and evaluation core.
//!
//! We use `thiserror` to generate `Error` implementations and messages.
//!
//! ## What is *not* an error
//!
//! A breakpoint whose module is not loaded yet, or whose module is loaded but
//! contains no match, is reported through its `resolved` / `verified` state.
//! Only failures that the caller has to act on become a [`DebuggerError`].

use thiserror::Error;

/// Main error type for debugger operations
///
/// ## Error Categories
///
/// 1. **Runtime errors**: `Runtime` (a debugging API call returned a failure status)
/// 2. **Symbol errors**: `Symbols`
/// 3. **Breakpoint errors**: `BreakpointIdNotFound`
/// 4. **Evaluation errors**: `Eval`, `PredefinedTypesNotReady`, `Cancelled`
/// 5. **Caller errors**: `InvalidArgument`, `InvalidState`, `Config`
#[derive(Error, Debug)]
pub enum DebuggerError
{
    /// A runtime debugging API call failed.
    ///
    /// `call` names the API entry point so the failure can be traced back to
    /// its call site; `code` is the status the runtime returned.
    #[error("{call} failed: 0x{code:08x}")]
    Runtime
    {
        call: &'static str, code: u32
    },

    /// The symbol reader failed (as opposed to answering "no match").
    #[error("Symbol lookup failed: {0}")]
    Symbols(String),

    /// No breakpoint exists for the given identifier.
    #[error("No breakpoint with id {0}")]
    BreakpointIdNotFound(u32),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not valid in the current lifecycle state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// An option in the environment could not be parsed.
    #[error(transparent)]
    Config(#[from] sharpdbg_utils::ConfigError),

    /// Expression evaluation failed; the message is meant for the user.
    #[error(transparent)]
    Eval(#[from] EvalError),

    /// Evaluation was requested before the core library finished loading.
    ///
    /// Literal construction needs the predefined class handles discovered at
    /// that point, so the evaluation fails instead of using empty handles.
    #[error("Evaluation is not available until the core library is loaded")]
    PredefinedTypesNotReady,

    /// The evaluation was aborted by the user or the session is shutting down.
    #[error("Evaluation cancelled")]
    Cancelled,
}

impl DebuggerError
{
    /// Build a [`DebuggerError::Runtime`] for `call`.
    #[must_use]
    pub const fn runtime(call: &'static str, code: u32) -> Self
    {
        Self::Runtime { call, code }
    }
}

/// Structured evaluation failure reported back to the front end.
///
/// None of these end the debugging session; they describe why one expression
/// could not produce a value or perform a write.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError
{
    #[error("The name '{0}' does not exist in the current context")]
    UnknownIdentifier(String),

    #[error("Object reference not set to an instance of an object while accessing '{0}'")]
    NullReference(String),

    #[error("Expression '{0}' is not an assignable location")]
    NotEditable(String),

    #[error("Cannot convert {from} to {to}")]
    TypeMismatch
    {
        from: String, to: String
    },

    #[error("Arithmetic operation resulted in an overflow")]
    Overflow,

    /// Error text reported by the operator service.
    #[error("{0}")]
    Operator(String),

    #[error("Evaluation requires running code in the debuggee, which is disabled")]
    FuncEvalDisabled,

    /// Managed code invoked by the evaluation threw.
    #[error("Evaluation threw an exception of type '{type_name}'")]
    ExceptionThrown
    {
        type_name: String
    },

    /// Diagnostics produced by the expression compiler.
    #[error("{0}")]
    Compile(String),

    #[error("No method '{name}' accepting {arguments} argument(s)")]
    MethodNotFound
    {
        name: String, arguments: usize
    },

    /// The compiled program does not have the stack shape an instruction needs.
    #[error("Malformed evaluation program: {0}")]
    InvalidProgram(String),
}

/// Convenience type alias for `Result<T, DebuggerError>`
///
/// ```rust
/// use sharpdbg_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, DebuggerError>;

/// Log a failing runtime call with its call site, then hand the error back.
///
/// Use with `map_err` on every runtime API result so failures are never
/// silently swallowed:
///
/// ```rust
/// use sharpdbg_core::error::{log_failure, DebuggerError, Result};
///
/// fn activate() -> Result<()>
/// {
///     Err(DebuggerError::runtime("Activate", 0x8013_1301))
/// }
///
/// let result = activate().map_err(log_failure("activate binding"));
/// assert!(result.is_err());
/// ```
pub fn log_failure(context: &'static str) -> impl Fn(DebuggerError) -> DebuggerError
{
    move |err| {
        tracing::error!(context, "{err}");
        err
    }
}
