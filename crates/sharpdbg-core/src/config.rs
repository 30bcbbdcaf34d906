//! # Debugger Options
//!
//! Session options consumed by the breakpoint managers and the evaluator.
//!
//! ## Environment Variables
//!
//! - `SHARPDBG_JUST_MY_CODE`: only bind breakpoints in modules with symbols (default: on)
//! - `SHARPDBG_STOP_AT_ENTRY`: stop at the program entry point (default: off)
//! - `SHARPDBG_BREAK_ON_UNHANDLED`: stop on unhandled exceptions without a filter (default: on)
//! - `SHARPDBG_ALLOW_FUNC_EVAL`: let evaluations run getters and methods (default: on)

use sharpdbg_utils::env_flag;

use crate::error::Result;
use crate::types::EvalFlags;

pub const JUST_MY_CODE_ENV: &str = "SHARPDBG_JUST_MY_CODE";
pub const STOP_AT_ENTRY_ENV: &str = "SHARPDBG_STOP_AT_ENTRY";
pub const BREAK_ON_UNHANDLED_ENV: &str = "SHARPDBG_BREAK_ON_UNHANDLED";
pub const ALLOW_FUNC_EVAL_ENV: &str = "SHARPDBG_ALLOW_FUNC_EVAL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebuggerOptions
{
    pub just_my_code: bool,
    pub stop_at_entry: bool,
    /// Stop on unhandled exceptions even when no exception filter matches.
    pub break_on_unhandled: bool,
    /// Flags applied to breakpoint condition evaluation.
    pub eval_flags: EvalFlags,
}

impl Default for DebuggerOptions
{
    fn default() -> Self
    {
        Self {
            just_my_code: true,
            stop_at_entry: false,
            break_on_unhandled: true,
            eval_flags: EvalFlags::NONE,
        }
    }
}

impl DebuggerOptions
{
    /// Defaults overridden by whatever `SHARPDBG_*` variables are set.
    ///
    /// # Errors
    ///
    /// [`DebuggerError::Config`](crate::DebuggerError::Config) when a variable
    /// is set to something that is not a boolean.
    pub fn from_env() -> Result<Self>
    {
        let mut options = Self::default();
        if let Some(value) = env_flag(JUST_MY_CODE_ENV)? {
            options.just_my_code = value;
        }
        if let Some(value) = env_flag(STOP_AT_ENTRY_ENV)? {
            options.stop_at_entry = value;
        }
        if let Some(value) = env_flag(BREAK_ON_UNHANDLED_ENV)? {
            options.break_on_unhandled = value;
        }
        if env_flag(ALLOW_FUNC_EVAL_ENV)? == Some(false) {
            options.eval_flags = options.eval_flags | EvalFlags::NO_FUNC_EVAL;
        }
        tracing::debug!(?options, "debugger options loaded");
        Ok(options)
    }
}
