//! # Evaluation Context
//!
//! Per-evaluation state and the process-wide predefined class cache.
//!
//! Literals are materialized as instances of the core library's primitive
//! classes (`System.Int32`, `System.Decimal`, ...). Those classes are looked
//! up once, when the core library module finishes loading, and kept for the
//! rest of the process. Until then every evaluation fails with
//! [`DebuggerError::PredefinedTypesNotReady`].

use std::collections::HashMap;

use crate::error::{DebuggerError, Result};
use crate::runtime::{Class, DebugRuntime, Frame, Handle, Module, Thread};
use crate::types::{ElementType, EvalFlags, FrameLevel};

/// File name of the runtime's core library.
pub const CORE_LIBRARY: &str = "System.Private.CoreLib.dll";

/// Handles to the core library classes literal construction depends on.
pub struct PredefinedTypes
{
    pub decimal: Handle<dyn Class>,
    pub void: Handle<dyn Class>,
    primitives: HashMap<ElementType, Handle<dyn Class>>,
}

impl PredefinedTypes
{
    /// Look every predefined class up in the core library module.
    ///
    /// # Errors
    ///
    /// [`DebuggerError::InvalidArgument`] if `module` is not the core library,
    /// [`DebuggerError::InvalidState`] if a class is missing from it, or any
    /// runtime failure.
    pub fn discover(runtime: &dyn DebugRuntime, module: &dyn Module) -> Result<Self>
    {
        let name = module.name()?;
        if !name.eq_ignore_ascii_case(CORE_LIBRARY) {
            return Err(DebuggerError::InvalidArgument(format!("{name} is not the core library")));
        }

        let find = |type_name: &str| -> Result<Handle<dyn Class>> {
            runtime
                .find_class(module, type_name)?
                .ok_or_else(|| DebuggerError::InvalidState(format!("{type_name} not found in {CORE_LIBRARY}")))
        };

        let mut primitives = HashMap::with_capacity(ElementType::PRIMITIVES.len() + 1);
        for element_type in ElementType::PRIMITIVES.into_iter().chain([ElementType::String]) {
            if let Some(type_name) = element_type.core_type_name() {
                primitives.insert(element_type, find(type_name)?);
            }
        }

        Ok(Self {
            decimal: find("System.Decimal")?,
            void: find("System.Void")?,
            primitives,
        })
    }

    /// Class backing a primitive element type (or `System.String`).
    #[must_use]
    pub fn primitive(&self, element_type: ElementType) -> Option<&Handle<dyn Class>>
    {
        self.primitives.get(&element_type)
    }
}

impl std::fmt::Debug for PredefinedTypes
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("PredefinedTypes")
            .field("primitives", &self.primitives.len())
            .finish_non_exhaustive()
    }
}

/// State of one in-flight evaluation.
pub struct EvalContext<'a>
{
    pub thread: &'a dyn Thread,
    pub frame: Handle<dyn Frame>,
    pub level: FrameLevel,
    pub flags: EvalFlags,
    pub predefined: &'a PredefinedTypes,
}

impl<'a> EvalContext<'a>
{
    /// Resolve the frame at `level` of `thread`.
    ///
    /// # Errors
    ///
    /// Runtime failure fetching the frame.
    pub fn new(thread: &'a dyn Thread, level: FrameLevel, flags: EvalFlags, predefined: &'a PredefinedTypes) -> Result<Self>
    {
        Ok(Self {
            thread,
            frame: thread.frame(level)?,
            level,
            flags,
            predefined,
        })
    }

    #[must_use]
    pub const fn func_eval_allowed(&self) -> bool
    {
        !self.flags.contains(EvalFlags::NO_FUNC_EVAL)
    }
}
