//! # Runtime Debugging API
//!
//! The interface this crate consumes from the managed runtime's debugging API.
//!
//! The runtime exposes reference-counted objects (modules, threads, frames,
//! classes, values, native breakpoints). Each object trait below extends
//! [`RuntimeObject`], and every object handed to this crate arrives wrapped in
//! a [`Handle`] that releases it when dropped.
//!
//! Every fallible call returns a checked [`Result`]; a handle produced by a
//! call is only touched after the call reported success.
//!
//! ## Threading
//!
//! Implementations must be `Send + Sync`: runtime callbacks arrive on
//! debuggee-controlled threads while front-end requests arrive on a control
//! thread, and both reach the runtime through the same `Arc<dyn DebugRuntime>`.

pub mod handle;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

use std::any::Any;

pub use handle::{acquire_into, Handle};

use crate::error::Result;
use crate::types::{ElementType, FieldToken, FrameLevel, MethodToken, ModuleId, ObjectId, PrimitiveValue, ThreadId, TypeToken};

/// Common behaviour of every object owned by the runtime.
pub trait RuntimeObject: Send + Sync
{
    /// Identity used to compare two references to the same object.
    fn object_id(&self) -> ObjectId;

    /// Take an additional runtime reference.
    fn add_ref(&self);

    /// Drop one runtime reference. Called by [`Handle`]'s `Drop`.
    fn release(&self);

    /// Downcast support for runtime implementations receiving their own
    /// objects back as trait objects.
    fn as_any(&self) -> &dyn Any;
}

/// A loaded module (one per load; a reload of the same file is a new module).
pub trait Module: RuntimeObject
{
    fn module_id(&self) -> ModuleId;

    /// File name of the module, e.g. `App.dll`.
    fn name(&self) -> Result<String>;

    /// Full path the module was loaded from.
    fn path(&self) -> Result<String>;

    /// Entry point method, if this module is the program's entry assembly.
    fn entry_point(&self) -> Result<Option<MethodToken>>;
}

/// A debuggee thread.
pub trait Thread: RuntimeObject
{
    fn thread_id(&self) -> ThreadId;

    /// Stack frame at `level` (0 = innermost).
    fn frame(&self, level: FrameLevel) -> Result<Handle<dyn Frame>>;

    /// The exception currently in flight on this thread, if any.
    fn current_exception(&self) -> Result<Option<Handle<dyn Value>>>;
}

/// One IL frame of a stopped thread.
pub trait Frame: RuntimeObject
{
    fn module(&self) -> Result<Handle<dyn Module>>;

    fn method(&self) -> MethodToken;

    fn il_offset(&self) -> Result<u32>;

    /// Class declaring the frame's method.
    fn declaring_class(&self) -> Result<Handle<dyn Class>>;

    /// `this` for instance methods, `None` for static methods.
    fn this_value(&self) -> Result<Option<Handle<dyn Value>>>;

    /// Local variable slot `index`. The returned value is the slot itself:
    /// writing to it writes the local.
    fn local(&self, index: u32) -> Result<Handle<dyn Value>>;

    /// Declared parameter `index` (not counting `this`).
    fn argument(&self, index: u32) -> Result<Handle<dyn Value>>;
}

/// Field or property of a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberKind
{
    Field(FieldToken),
    Property
    {
        getter: Option<MethodToken>,
        setter: Option<MethodToken>,
    },
}

/// Declared member of a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo
{
    pub name: String,
    pub kind: MemberKind,
    pub is_static: bool,
}

/// Declared method of a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo
{
    pub token: MethodToken,
    pub name: String,
    pub parameter_count: usize,
    pub is_static: bool,
}

/// A loaded type.
pub trait Class: RuntimeObject
{
    fn type_token(&self) -> TypeToken;

    fn module_id(&self) -> ModuleId;

    /// Fully qualified name, e.g. `System.ArgumentException`.
    fn name(&self) -> Result<String>;

    fn base_class(&self) -> Result<Option<Handle<dyn Class>>>;

    /// Members declared by this class only (not inherited).
    fn members(&self) -> Result<Vec<MemberInfo>>;

    /// Methods declared by this class with the given simple name.
    fn methods(&self, name: &str) -> Result<Vec<MethodInfo>>;
}

/// A value or storage location inside the debuggee.
pub trait Value: RuntimeObject
{
    fn element_type(&self) -> Result<ElementType>;

    fn is_null(&self) -> Result<bool>;

    /// Runtime class of the value; for null references the static class when
    /// the runtime knows it.
    fn class(&self) -> Result<Option<Handle<dyn Class>>>;

    /// Read primitive data (numbers, chars, strings, null).
    fn read(&self) -> Result<PrimitiveValue>;
}

/// A native code breakpoint placed in one version of one method.
pub trait NativeBreakpoint: RuntimeObject
{
    fn activate(&self, active: bool) -> Result<()>;

    fn is_active(&self) -> Result<bool>;
}

/// Arguments of one managed function evaluation.
pub struct FuncEvalCall<'a>
{
    pub module: ModuleId,
    pub method: MethodToken,
    pub receiver: Option<&'a dyn Value>,
    pub arguments: Vec<&'a dyn Value>,
}

/// How a managed function evaluation finished.
#[derive(Debug)]
pub enum FuncEvalOutcome
{
    /// The function returned; `None` for `void` functions.
    Returned(Option<Handle<dyn Value>>),
    /// The function threw; the value is the exception object.
    Threw(Handle<dyn Value>),
}

/// Process-level debugging API.
pub trait DebugRuntime: Send + Sync
{
    /// Modules currently loaded in the debuggee (empty before launch).
    fn loaded_modules(&self) -> Result<Vec<Handle<dyn Module>>>;

    /// Create an inactive native breakpoint at `il_offset` of the current
    /// version of `method`.
    fn create_breakpoint(&self, module: &dyn Module, method: MethodToken, il_offset: u32) -> Result<Handle<dyn NativeBreakpoint>>;

    /// Current edit-and-continue version of a method (1 until first reload).
    fn method_version(&self, module: &dyn Module, method: MethodToken) -> Result<u32>;

    /// Look up a class by fully qualified name inside `module`.
    fn find_class(&self, module: &dyn Module, name: &str) -> Result<Option<Handle<dyn Class>>>;

    /// Read a field. `receiver` is `None` for static fields. The returned value
    /// is the field slot itself.
    fn read_field(&self, class: &dyn Class, receiver: Option<&dyn Value>, field: FieldToken) -> Result<Handle<dyn Value>>;

    /// Element slot of an array.
    fn array_element(&self, array: &dyn Value, indices: &[u32]) -> Result<Handle<dyn Value>>;

    /// Copy `source` into the storage location `location`.
    fn write_value(&self, location: &dyn Value, source: &dyn Value) -> Result<()>;

    /// Materialize primitive data as an instance of `class` (a predefined
    /// primitive, `System.Decimal`, or `System.Void`).
    fn create_value(&self, thread: &dyn Thread, class: &dyn Class, data: &PrimitiveValue) -> Result<Handle<dyn Value>>;

    fn create_string(&self, thread: &dyn Thread, text: &str) -> Result<Handle<dyn Value>>;

    fn create_null(&self, thread: &dyn Thread) -> Result<Handle<dyn Value>>;

    /// Start a function evaluation on `thread`.
    ///
    /// Completion is asynchronous: the runtime reports it through its eval
    /// complete callback, which must be routed to
    /// [`EvalWaiter::notify_eval_complete`](crate::eval::EvalWaiter::notify_eval_complete).
    fn begin_func_eval(&self, thread: &dyn Thread, call: &FuncEvalCall<'_>) -> Result<()>;

    /// Abort the evaluation in flight on `thread`.
    fn abort_func_eval(&self, thread: &dyn Thread) -> Result<()>;
}
