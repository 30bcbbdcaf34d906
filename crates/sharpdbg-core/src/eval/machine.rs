//! # Evaluation Stack Machine
//!
//! Runs one compiled expression against a stopped thread.
//!
//! ## Execution model
//!
//! The machine keeps a stack of [`EvalStackEntry`]s. Identifier and member
//! instructions only record names; the path is resolved lazily, the first time
//! an instruction needs the value or at the end of the program. Resolution of
//! the first component searches, in order:
//!
//! 1. locals of the current frame that are in scope at the current IL offset
//! 2. declared parameters
//! 3. hoisted locals (`<name>5__N` fields of `this` in state machines)
//! 4. members of `this` and of the enclosing class, including base classes
//! 5. classes of any loaded module, by the longest dotted prefix
//!
//! Later components are members of the value resolved so far. Properties are
//! read by evaluating their getter in the debuggee, which goes through the
//! [`EvalWaiter`] like every other function evaluation.
//!
//! ## Null-conditional access
//!
//! `a?.b` compiles to `Identifier(a), ConditionalAccess, MemberAccess(b)`.
//! When `a` is null the entry stops binding: member, index and call
//! instructions leave it alone and the expression yields the null `a`.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use sharpdbg_core::eval::{EvalStackMachine, EvalWaiter, Instruction};
//! use sharpdbg_core::runtime::mock::{ClassSpec, FrameSpec, MockCompiler, MockRuntime, MockSymbols};
//! use sharpdbg_core::types::{EvalFlags, FrameLevel, PrimitiveValue};
//!
//! let runtime = Arc::new(MockRuntime::new());
//! let compiler = Arc::new(MockCompiler::new());
//! compiler.define("1 + 2", [
//!     Instruction::Literal(PrimitiveValue::I4(1)),
//!     Instruction::Literal(PrimitiveValue::I4(2)),
//!     Instruction::Binary(sharpdbg_core::eval::BinaryOp::Add),
//! ]);
//!
//! let waiter = Arc::new(EvalWaiter::new());
//! runtime.attach_waiter(&waiter);
//! let machine = EvalStackMachine::new(runtime.clone(), Arc::new(MockSymbols::new()), compiler, waiter);
//! machine.find_predefined_types(&*runtime.module_handle(&runtime.load_core_library()))?;
//!
//! let app = runtime.load_module("App.dll");
//! let program = runtime.define_class(&app, ClassSpec::new("App.Program"));
//! let thread = runtime.add_thread(1);
//! runtime.push_frame(&thread, FrameSpec::new(&app, &program, 0x0600_0001));
//!
//! let result = machine.evaluate_expression(&*thread, FrameLevel(0), EvalFlags::NONE, "1 + 2")?;
//! assert_eq!(result.display, "3");
//! # Ok::<(), sharpdbg_core::DebuggerError>(())
//! ```

use std::sync::Arc;

use once_cell::sync::OnceCell;

use super::context::{EvalContext, PredefinedTypes};
use super::entry::{Editability, EvalStackEntry, ResetLiteral, SetterData};
use super::operators::{ConversionKind, NumericOperators, OperatorEvaluator};
use super::program::{ExpressionCompiler, Instruction, StackProgram};
use super::waiter::{EvalScope, EvalWaiter};
use crate::error::{log_failure, DebuggerError, EvalError, Result};
use crate::runtime::{Class, DebugRuntime, FuncEvalCall, FuncEvalOutcome, Handle, MemberInfo, MemberKind, MethodInfo, Module, Thread, Value};
use crate::symbols::SymbolService;
use crate::types::{ElementType, EvalFlags, FrameLevel, MethodToken, ModuleId, PrimitiveValue};

/// Outcome of a successful evaluation.
#[derive(Debug)]
pub struct EvaluationResult
{
    pub value: Handle<dyn Value>,
    /// Text for the front end.
    pub display: String,
    pub editable: bool,
    /// Present when the result is a property that can be assigned.
    pub setter: Option<SetterData>,
}

/// What the receiver part of a call resolved to.
enum CallTarget
{
    Value(Handle<dyn Value>),
    Type(Handle<dyn Class>),
}

/// Executes stack programs against live debuggee state.
pub struct EvalStackMachine
{
    runtime: Arc<dyn DebugRuntime>,
    symbols: Arc<dyn SymbolService>,
    compiler: Arc<dyn ExpressionCompiler>,
    operators: Arc<dyn OperatorEvaluator>,
    waiter: Arc<EvalWaiter>,
    predefined: OnceCell<PredefinedTypes>,
}

impl EvalStackMachine
{
    pub fn new(
        runtime: Arc<dyn DebugRuntime>,
        symbols: Arc<dyn SymbolService>,
        compiler: Arc<dyn ExpressionCompiler>,
        waiter: Arc<EvalWaiter>,
    ) -> Self
    {
        Self {
            runtime,
            symbols,
            compiler,
            operators: Arc::new(NumericOperators),
            waiter,
            predefined: OnceCell::new(),
        }
    }

    /// Replace the built-in operator semantics.
    #[must_use]
    pub fn with_operators(mut self, operators: Arc<dyn OperatorEvaluator>) -> Self
    {
        self.operators = operators;
        self
    }

    #[must_use]
    pub fn waiter(&self) -> &Arc<EvalWaiter>
    {
        &self.waiter
    }

    /// Discover the predefined classes in the freshly loaded core library.
    ///
    /// Must be called exactly once, from the module-loaded callback of the
    /// core library.
    ///
    /// # Errors
    ///
    /// [`DebuggerError::InvalidState`] on a second call, or any discovery
    /// failure (the cache stays empty and evaluations keep failing with
    /// [`DebuggerError::PredefinedTypesNotReady`]).
    pub fn find_predefined_types(&self, core_library: &dyn Module) -> Result<()>
    {
        if self.predefined.get().is_some() {
            return Err(DebuggerError::InvalidState("predefined types already discovered".to_string()));
        }
        let types = PredefinedTypes::discover(self.runtime.as_ref(), core_library).map_err(log_failure("find predefined types"))?;
        self.predefined
            .set(types)
            .map_err(|_| DebuggerError::InvalidState("predefined types already discovered".to_string()))?;
        tracing::info!("predefined types discovered");
        Ok(())
    }

    #[must_use]
    pub fn predefined_types_ready(&self) -> bool
    {
        self.predefined.get().is_some()
    }

    fn predefined(&self) -> Result<&PredefinedTypes>
    {
        self.predefined.get().ok_or(DebuggerError::PredefinedTypesNotReady)
    }

    /// Evaluate `expression` in the frame at `level` of `thread`.
    ///
    /// # Errors
    ///
    /// [`DebuggerError::PredefinedTypesNotReady`] before the core library
    /// loaded, [`DebuggerError::Eval`] for anything wrong with the expression,
    /// [`DebuggerError::Cancelled`] when aborted, or a runtime failure.
    pub fn evaluate_expression(&self, thread: &dyn Thread, level: FrameLevel, flags: EvalFlags, expression: &str) -> Result<EvaluationResult>
    {
        let predefined = self.predefined()?;
        let program = self.compiler.compile(expression)?;
        let scope = self.waiter.enter()?;
        let ctx = EvalContext::new(thread, level, flags, predefined)?;

        tracing::debug!(expression, level = level.0, "evaluating expression");
        let entry = self.execute(&ctx, &scope, &program)?;
        self.finish(entry)
    }

    /// Assign the value of `value_expression` to the location `target`.
    ///
    /// The target is evaluated first and must be editable; the value is then
    /// evaluated and implicitly converted to the target's type. Literal values
    /// may narrow when they fit, other values may only widen.
    ///
    /// # Errors
    ///
    /// [`EvalError::NotEditable`] (without evaluating the value) if the target
    /// is not assignable, [`EvalError::TypeMismatch`] if no implicit
    /// conversion exists, plus everything [`evaluate_expression`](Self::evaluate_expression) reports.
    pub fn set_value_by_expression(
        &self,
        thread: &dyn Thread,
        level: FrameLevel,
        flags: EvalFlags,
        target: &str,
        value_expression: &str,
    ) -> Result<EvaluationResult>
    {
        let predefined = self.predefined()?;
        let target_program = self.compiler.compile(target)?;
        let scope = self.waiter.enter()?;
        let ctx = EvalContext::new(thread, level, flags, predefined)?;

        let location = self.execute(&ctx, &scope, &target_program)?;
        let Some(location_value) = location.value.as_ref() else {
            return Err(EvalError::NotEditable(target.to_string()).into());
        };
        if location.literal || location.prevent_binding || !location.editability.is_editable() {
            return Err(EvalError::NotEditable(target.to_string()).into());
        }

        let value_program = self.compiler.compile(value_expression)?;
        let source = self.execute(&ctx, &scope, &value_program)?;
        let converted = self.convert_for_assignment(&ctx, &**location_value, &source)?;

        match &location.editability {
            Editability::Slot => {
                self.runtime
                    .write_value(&**location_value, &*converted)
                    .map_err(log_failure("write value"))?;
            }
            Editability::Property(setter) => {
                let receiver = setter.receiver.as_ref().map(|r| &**r);
                self.invoke(&ctx, setter.module, setter.setter, receiver, &[&*converted])?;
            }
            Editability::ReadOnly => return Err(EvalError::NotEditable(target.to_string()).into()),
        }
        tracing::debug!(target, value_expression, "value assigned");

        let display = display_text(&*converted)?;
        Ok(EvaluationResult {
            value: converted,
            display,
            editable: false,
            setter: None,
        })
    }

    /// Read a member (field or property) of `object`, evaluating getters.
    ///
    /// Used for exception details; `None` when the class has no such member,
    /// and for properties when `flags` forbid function evaluation.
    ///
    /// # Errors
    ///
    /// Runtime failures and getter failures.
    pub fn read_member(&self, thread: &dyn Thread, flags: EvalFlags, object: &dyn Value, name: &str) -> Result<Option<Handle<dyn Value>>>
    {
        let Some(class) = object.class()? else {
            return Ok(None);
        };
        let Some((declaring, member)) = find_member(class, |m| m.name == name)? else {
            return Ok(None);
        };
        let _scope = self.waiter.enter()?;
        let value = match member.kind {
            MemberKind::Field(token) => {
                let receiver = if member.is_static { None } else { Some(object) };
                self.runtime.read_field(&*declaring, receiver, token)?
            }
            MemberKind::Property { getter: Some(_), .. } if flags.contains(EvalFlags::NO_FUNC_EVAL) => {
                tracing::debug!(member = name, "getter skipped, function evaluation is disabled");
                return Ok(None);
            }
            MemberKind::Property { getter: Some(getter), .. } => {
                let receiver = if member.is_static { None } else { Some(object) };
                match self.call_function(thread, declaring.module_id(), getter, receiver, &[])? {
                    Some(value) => value,
                    None => return Ok(None),
                }
            }
            MemberKind::Property { getter: None, .. } => return Ok(None),
        };
        Ok(Some(value))
    }

    /// Run a static method in the debuggee, outside of any expression.
    ///
    /// # Errors
    ///
    /// [`EvalError::FuncEvalDisabled`] when `flags` forbid it, otherwise the
    /// same failures as a getter call in an expression.
    pub fn call_static(
        &self,
        thread: &dyn Thread,
        flags: EvalFlags,
        module: ModuleId,
        method: MethodToken,
        arguments: &[&dyn Value],
    ) -> Result<Option<Handle<dyn Value>>>
    {
        if flags.contains(EvalFlags::NO_FUNC_EVAL) {
            return Err(EvalError::FuncEvalDisabled.into());
        }
        self.call_function(thread, module, method, None, arguments)
    }

    fn finish(&self, mut entry: EvalStackEntry) -> Result<EvaluationResult>
    {
        let Some(value) = entry.value.take() else {
            return Err(EvalError::InvalidProgram("expression produced no value".to_string()).into());
        };
        let display = display_text(&*value)?;
        let editable = !entry.literal && !entry.prevent_binding && entry.editability.is_editable();
        let setter = match std::mem::take(&mut entry.editability) {
            Editability::Property(setter) if editable => Some(setter),
            _ => None,
        };
        Ok(EvaluationResult {
            value,
            display,
            editable,
            setter,
        })
    }

    // -- program execution ---------------------------------------------------

    fn execute(&self, ctx: &EvalContext<'_>, scope: &EvalScope<'_>, program: &StackProgram) -> Result<EvalStackEntry>
    {
        let mut stack: Vec<EvalStackEntry> = Vec::new();

        for instruction in &program.instructions {
            scope.check()?;
            tracing::trace!(?instruction, depth = stack.len(), "executing");
            match instruction {
                Instruction::Identifier(name) => stack.push(EvalStackEntry::identifier(name.clone())),
                Instruction::MemberAccess(name) => {
                    let top = top(&mut stack)?;
                    if !top.prevent_binding {
                        top.identifiers.push(name.clone());
                    }
                }
                Instruction::ConditionalAccess => {
                    let top = top(&mut stack)?;
                    if !top.prevent_binding {
                        self.resolve(ctx, top)?;
                        if resolved(top)?.is_null()? {
                            top.prevent_binding = true;
                        }
                    }
                }
                Instruction::This => {
                    let this = ctx
                        .frame
                        .this_value()?
                        .ok_or_else(|| EvalError::UnknownIdentifier("this".to_string()))?;
                    stack.push(EvalStackEntry::resolved(this, Editability::ReadOnly));
                }
                Instruction::Literal(data) => {
                    let value = self.materialize(ctx, data)?;
                    stack.push(EvalStackEntry::literal(value));
                }
                Instruction::Unary(op) => {
                    let top = top(&mut stack)?;
                    let operand = self.read_operand(ctx, top)?;
                    let result = self.operators.unary(*op, &operand)?;
                    let value = self.materialize(ctx, &result)?;
                    top.reset(ResetLiteral::No);
                    top.value = Some(value);
                }
                Instruction::Binary(op) => {
                    let mut rhs = pop(&mut stack)?;
                    let lhs = top(&mut stack)?;
                    let left = self.read_operand(ctx, lhs)?;
                    let right = self.read_operand(ctx, &mut rhs)?;
                    let result = self.operators.binary(*op, &left, &right)?;
                    let value = self.materialize(ctx, &result)?;
                    let literal = lhs.literal && rhs.literal;
                    lhs.reset(ResetLiteral::Yes);
                    lhs.literal = literal;
                    lhs.value = Some(value);
                }
                Instruction::Cast(type_name) => {
                    let target = cast_target(type_name).ok_or_else(|| EvalError::TypeMismatch {
                        from: "value".to_string(),
                        to: type_name.clone(),
                    })?;
                    let top = top(&mut stack)?;
                    let operand = self.read_operand(ctx, top)?;
                    let result = self.operators.convert(&operand, target, ConversionKind::Explicit)?;
                    let value = self.materialize(ctx, &result)?;
                    top.reset(ResetLiteral::No);
                    top.value = Some(value);
                }
                Instruction::Index { arguments } => {
                    let mut indices = pop_n(&mut stack, *arguments)?;
                    let top = top(&mut stack)?;
                    if top.prevent_binding {
                        continue;
                    }
                    for index in &mut indices {
                        self.resolve(ctx, index)?;
                    }
                    self.resolve(ctx, top)?;
                    let (value, editability) = self.index(ctx, resolved(top)?, &indices)?;
                    top.reset(ResetLiteral::Yes);
                    top.value = Some(value);
                    top.editability = editability;
                }
                Instruction::Call { arguments } => {
                    let mut args = pop_n(&mut stack, *arguments)?;
                    let top = top(&mut stack)?;
                    if top.prevent_binding {
                        continue;
                    }
                    for arg in &mut args {
                        self.resolve(ctx, arg)?;
                    }
                    let value = self.call(ctx, top, &args)?;
                    top.reset(ResetLiteral::Yes);
                    top.value = Some(value);
                }
            }
        }

        let mut entry = pop(&mut stack)?;
        if !stack.is_empty() {
            return Err(EvalError::InvalidProgram(format!("{} values left on the stack", stack.len())).into());
        }
        self.resolve(ctx, &mut entry)?;
        Ok(entry)
    }

    /// Resolve the entry's pending identifiers (no-op once resolved or while
    /// binding is prevented).
    fn resolve(&self, ctx: &EvalContext<'_>, entry: &mut EvalStackEntry) -> Result<()>
    {
        if entry.prevent_binding || entry.identifiers.is_empty() {
            if entry.value.is_none() && !entry.prevent_binding {
                return Err(EvalError::InvalidProgram("entry has neither a value nor a name".to_string()).into());
            }
            return Ok(());
        }

        let names: Vec<String> = entry.identifiers.drain(..).collect();
        let (mut current, mut editability, consumed) = match entry.value.take() {
            Some(value) => (value, std::mem::take(&mut entry.editability), 0),
            None => self.resolve_root(ctx, &names)?,
        };

        for name in &names[consumed..] {
            if current.is_null()? {
                return Err(EvalError::NullReference(name.clone()).into());
            }
            let (value, member_editability) = self
                .member_of_value(ctx, current, name)?
                .ok_or_else(|| EvalError::UnknownIdentifier(name.clone()))?;
            current = value;
            editability = member_editability;
        }

        entry.value = Some(current);
        entry.editability = editability;
        entry.literal = false;
        Ok(())
    }

    /// Resolve the leading component(s) of a path without a receiver.
    ///
    /// Returns the value, its editability, and how many components it used.
    fn resolve_root(&self, ctx: &EvalContext<'_>, names: &[String]) -> Result<(Handle<dyn Value>, Editability, usize)>
    {
        let first = &names[0];
        let module = ctx.frame.module()?;
        let method = ctx.frame.method();
        let il_offset = ctx.frame.il_offset()?;

        let locals = self.symbols.local_variables(&*module, method)?;
        if let Some(local) = locals.iter().find(|l| &l.name == first && l.in_scope(il_offset)) {
            return Ok((ctx.frame.local(local.index)?, Editability::Slot, 1));
        }

        let parameters = self.symbols.parameter_names(&*module, method)?;
        if let Some(index) = parameters.iter().position(|p| p == first) {
            let index = u32::try_from(index).map_err(|_| DebuggerError::InvalidArgument("parameter index".to_string()))?;
            return Ok((ctx.frame.argument(index)?, Editability::Slot, 1));
        }

        let this = ctx.frame.this_value()?;
        if let Some(this) = &this {
            if let Some(class) = this.class()? {
                let hoisted = format!("<{first}>5__");
                if let Some((declaring, member)) = find_member(class, |m| !m.is_static && m.name.starts_with(&hoisted))? {
                    if let MemberKind::Field(token) = member.kind {
                        let value = self.runtime.read_field(&*declaring, Some(&**this), token)?;
                        return Ok((value, Editability::Slot, 1));
                    }
                }
            }
        }

        // Instance members need `this`; static members come from the
        // declaring class of the frame's method.
        let class = ctx.frame.declaring_class()?;
        let wants_static = this.is_none();
        if let Some((declaring, member)) = find_member(class, |m| &m.name == first && (!wants_static || m.is_static))? {
            let (value, editability) = self.member_value(ctx, &*declaring, &member, this.as_ref())?;
            return Ok((value, editability, 1));
        }

        for split in (1..names.len()).rev() {
            let type_name = names[..split].join(".");
            if let Some(class) = self.find_global_class(&type_name)? {
                let member_name = &names[split];
                let (declaring, member) = find_member(class, |m| &m.name == member_name && m.is_static)?
                    .ok_or_else(|| EvalError::UnknownIdentifier(format!("{type_name}.{member_name}")))?;
                let (value, editability) = self.member_value(ctx, &*declaring, &member, None)?;
                return Ok((value, editability, split + 1));
            }
        }

        Err(EvalError::UnknownIdentifier(first.clone()).into())
    }

    fn find_global_class(&self, name: &str) -> Result<Option<Handle<dyn Class>>>
    {
        for module in self.runtime.loaded_modules()? {
            if let Some(class) = self.runtime.find_class(&*module, name)? {
                return Ok(Some(class));
            }
        }
        Ok(None)
    }

    fn member_of_value(&self, ctx: &EvalContext<'_>, value: Handle<dyn Value>, name: &str) -> Result<Option<(Handle<dyn Value>, Editability)>>
    {
        let Some(class) = value.class()? else {
            return Ok(None);
        };
        let Some((declaring, member)) = find_member(class, |m| m.name == name)? else {
            return Ok(None);
        };
        let receiver = if member.is_static { None } else { Some(&value) };
        self.member_value(ctx, &*declaring, &member, receiver).map(Some)
    }

    fn member_value(
        &self,
        ctx: &EvalContext<'_>,
        declaring: &dyn Class,
        member: &MemberInfo,
        receiver: Option<&Handle<dyn Value>>,
    ) -> Result<(Handle<dyn Value>, Editability)>
    {
        let receiver = if member.is_static { None } else { receiver };
        if !member.is_static && receiver.is_none() {
            return Err(EvalError::UnknownIdentifier(member.name.clone()).into());
        }

        match member.kind {
            MemberKind::Field(token) => {
                let value = self.runtime.read_field(declaring, receiver.map(|r| &**r), token)?;
                Ok((value, Editability::Slot))
            }
            MemberKind::Property { getter, setter } => {
                let getter = getter.ok_or_else(|| EvalError::MethodNotFound {
                    name: format!("get_{}", member.name),
                    arguments: 0,
                })?;
                let value = self
                    .invoke(ctx, declaring.module_id(), getter, receiver.map(|r| &**r), &[])?
                    .ok_or_else(|| EvalError::InvalidProgram(format!("getter of '{}' returned no value", member.name)))?;
                let editability = match setter {
                    Some(setter) => Editability::Property(SetterData {
                        receiver: receiver.map(Handle::share),
                        module: declaring.module_id(),
                        setter,
                    }),
                    None => Editability::ReadOnly,
                };
                Ok((value, editability))
            }
        }
    }

    fn index(&self, ctx: &EvalContext<'_>, target: &Handle<dyn Value>, indices: &[EvalStackEntry]) -> Result<(Handle<dyn Value>, Editability)>
    {
        if target.is_null()? {
            return Err(EvalError::NullReference("[]".to_string()).into());
        }

        if target.element_type()? == ElementType::Array {
            let mut positions = Vec::with_capacity(indices.len());
            for index in indices {
                let data = resolved(index)?.read()?;
                let position = match self.operators.convert(&data, ElementType::I8, ConversionKind::Implicit)? {
                    PrimitiveValue::I8(position) => u32::try_from(position).map_err(|_| EvalError::Operator("Index was outside the bounds of the array.".to_string()))?,
                    other => return Err(EvalError::TypeMismatch { from: other.to_string(), to: "System.Int32".to_string() }.into()),
                };
                positions.push(position);
            }
            let element = self.runtime.array_element(&**target, &positions)?;
            return Ok((element, Editability::Slot));
        }

        // Indexer property.
        let class = target
            .class()?
            .ok_or_else(|| EvalError::MethodNotFound { name: "get_Item".to_string(), arguments: indices.len() })?;
        let (declaring, method) = find_method(class, "get_Item", indices.len())?
            .ok_or_else(|| EvalError::MethodNotFound { name: "get_Item".to_string(), arguments: indices.len() })?;
        let arguments = indices.iter().map(|index| resolved(index).map(|v| &**v)).collect::<Result<Vec<_>>>()?;
        let value = self
            .invoke(ctx, declaring.module_id(), method.token, Some(&**target), &arguments)?
            .ok_or_else(|| EvalError::InvalidProgram("indexer returned no value".to_string()))?;
        Ok((value, Editability::ReadOnly))
    }

    fn call(&self, ctx: &EvalContext<'_>, target: &mut EvalStackEntry, args: &[EvalStackEntry]) -> Result<Handle<dyn Value>>
    {
        let name = target
            .identifiers
            .pop()
            .ok_or_else(|| EvalError::InvalidProgram("call without a method name".to_string()))?;

        let (class, receiver) = if target.identifiers.is_empty() && target.value.is_none() {
            (ctx.frame.declaring_class()?, ctx.frame.this_value()?)
        } else {
            match self.call_target(ctx, target)? {
                CallTarget::Value(value) => {
                    if value.is_null()? {
                        return Err(EvalError::NullReference(name).into());
                    }
                    let class = value.class()?.ok_or_else(|| EvalError::MethodNotFound { name: name.clone(), arguments: args.len() })?;
                    (class, Some(value))
                }
                CallTarget::Type(class) => (class, None),
            }
        };

        let (declaring, method) = find_method(class, &name, args.len())?
            .filter(|(_, method)| method.is_static || receiver.is_some())
            .ok_or_else(|| EvalError::MethodNotFound { name: name.clone(), arguments: args.len() })?;

        let arguments = args.iter().map(|arg| resolved(arg).map(|v| &**v)).collect::<Result<Vec<_>>>()?;
        let receiver = if method.is_static { None } else { receiver.as_ref().map(|r| &**r) };
        match self.invoke(ctx, declaring.module_id(), method.token, receiver, &arguments)? {
            Some(value) => Ok(value),
            None => self.runtime.create_value(ctx.thread, &*ctx.predefined.void, &PrimitiveValue::Null),
        }
    }

    fn call_target(&self, ctx: &EvalContext<'_>, target: &mut EvalStackEntry) -> Result<CallTarget>
    {
        if target.value.is_none() {
            let path = target.path();
            match self.resolve(ctx, target) {
                Err(DebuggerError::Eval(EvalError::UnknownIdentifier(_))) => {
                    if let Some(class) = self.find_global_class(&path)? {
                        return Ok(CallTarget::Type(class));
                    }
                    return Err(EvalError::UnknownIdentifier(path).into());
                }
                other => other?,
            }
        } else {
            self.resolve(ctx, target)?;
        }
        let value = target
            .value
            .take()
            .ok_or_else(|| EvalError::InvalidProgram("call receiver did not resolve".to_string()))?;
        Ok(CallTarget::Value(value))
    }

    /// Run a method in the debuggee through the waiter.
    fn invoke(
        &self,
        ctx: &EvalContext<'_>,
        module: ModuleId,
        method: MethodToken,
        receiver: Option<&dyn Value>,
        arguments: &[&dyn Value],
    ) -> Result<Option<Handle<dyn Value>>>
    {
        if !ctx.func_eval_allowed() {
            return Err(EvalError::FuncEvalDisabled.into());
        }
        self.call_function(ctx.thread, module, method, receiver, arguments)
    }

    fn call_function(
        &self,
        thread: &dyn Thread,
        module: ModuleId,
        method: MethodToken,
        receiver: Option<&dyn Value>,
        arguments: &[&dyn Value],
    ) -> Result<Option<Handle<dyn Value>>>
    {
        // Reentry point: a cancelled chain stops here at any depth.
        let scope = self.waiter.enter()?;
        let call = FuncEvalCall {
            module,
            method,
            receiver,
            arguments: arguments.to_vec(),
        };

        tracing::debug!(%method, "function evaluation");
        let outcome = self
            .waiter
            .run(&scope, thread.thread_id(), || self.runtime.begin_func_eval(thread, &call));

        match outcome {
            Ok(FuncEvalOutcome::Returned(value)) => Ok(value),
            Ok(FuncEvalOutcome::Threw(exception)) => {
                let type_name = match exception.class()? {
                    Some(class) => class.name()?,
                    None => "System.Exception".to_string(),
                };
                tracing::debug!(%method, %type_name, "function evaluation threw");
                Err(EvalError::ExceptionThrown { type_name }.into())
            }
            Err(DebuggerError::Cancelled) => {
                let _ = self.runtime.abort_func_eval(thread).map_err(log_failure("abort function evaluation"));
                Err(DebuggerError::Cancelled)
            }
            Err(err) => Err(log_failure("function evaluation")(err)),
        }
    }

    // -- values ---------------------------------------------------------------

    fn read_operand(&self, ctx: &EvalContext<'_>, entry: &mut EvalStackEntry) -> Result<PrimitiveValue>
    {
        self.resolve(ctx, entry)?;
        let value = resolved(entry)?;
        if value.is_null()? {
            return Ok(PrimitiveValue::Null);
        }
        match value.element_type()? {
            ElementType::Class | ElementType::Object | ElementType::Array | ElementType::Void => Err(EvalError::Operator(format!(
                "Operator cannot be applied to operand of type '{}'",
                class_name(&**value)?
            ))
            .into()),
            _ => value.read(),
        }
    }

    /// Create a runtime value holding `data`.
    fn materialize(&self, ctx: &EvalContext<'_>, data: &PrimitiveValue) -> Result<Handle<dyn Value>>
    {
        match data {
            PrimitiveValue::String(text) => self.runtime.create_string(ctx.thread, text),
            PrimitiveValue::Null => self.runtime.create_null(ctx.thread),
            PrimitiveValue::Decimal(_) => self.runtime.create_value(ctx.thread, &*ctx.predefined.decimal, data),
            _ => {
                let class = ctx
                    .predefined
                    .primitive(data.element_type())
                    .ok_or(DebuggerError::PredefinedTypesNotReady)?;
                self.runtime.create_value(ctx.thread, &**class, data)
            }
        }
    }

    fn convert_for_assignment(&self, ctx: &EvalContext<'_>, location: &dyn Value, source: &EvalStackEntry) -> Result<Handle<dyn Value>>
    {
        let value = resolved(source)?;
        let target_type = location.element_type()?;
        let source_type = value.element_type()?;

        if target_type.is_primitive() {
            if matches!(source_type, ElementType::Class | ElementType::Object | ElementType::Array | ElementType::Void) && !value.is_null()? {
                return Err(mismatch(value, location)?);
            }
            let data = value.read()?;
            let kind = if source.literal { ConversionKind::Constant } else { ConversionKind::Implicit };
            let converted = self.operators.convert(&data, target_type, kind)?;
            return self.materialize(ctx, &converted);
        }

        if value.is_null()? {
            return if target_type.is_reference() {
                Ok(value.share())
            } else {
                Err(mismatch(value, location)?)
            };
        }

        match target_type {
            ElementType::String if source_type == ElementType::String => Ok(value.share()),
            ElementType::Object => Ok(value.share()),
            ElementType::Class | ElementType::ValueType | ElementType::Array => {
                let Some(target_class) = location.class()? else {
                    return if source_type == target_type { Ok(value.share()) } else { Err(mismatch(value, location)?) };
                };
                let target_name = target_class.name()?;
                let mut current = value.class()?;
                while let Some(class) = current {
                    if class.name()? == target_name {
                        return Ok(value.share());
                    }
                    current = class.base_class()?;
                }
                Err(mismatch(value, location)?)
            }
            _ => Err(mismatch(value, location)?),
        }
    }
}

fn top(stack: &mut [EvalStackEntry]) -> Result<&mut EvalStackEntry>
{
    stack
        .last_mut()
        .ok_or_else(|| EvalError::InvalidProgram("evaluation stack is empty".to_string()).into())
}

fn pop(stack: &mut Vec<EvalStackEntry>) -> Result<EvalStackEntry>
{
    stack
        .pop()
        .ok_or_else(|| EvalError::InvalidProgram("evaluation stack is empty".to_string()).into())
}

/// Pop `count` entries, returned in push order.
fn pop_n(stack: &mut Vec<EvalStackEntry>, count: usize) -> Result<Vec<EvalStackEntry>>
{
    if stack.len() < count + 1 {
        return Err(EvalError::InvalidProgram(format!("instruction needs {} stack entries", count + 1)).into());
    }
    Ok(stack.split_off(stack.len() - count))
}

fn resolved(entry: &EvalStackEntry) -> Result<&Handle<dyn Value>>
{
    entry
        .value
        .as_ref()
        .ok_or_else(|| EvalError::InvalidProgram("entry is not resolved".to_string()).into())
}

/// Walk `class` and its bases for the first member accepted by `filter`.
fn find_member(class: Handle<dyn Class>, filter: impl Fn(&MemberInfo) -> bool) -> Result<Option<(Handle<dyn Class>, MemberInfo)>>
{
    let mut current = Some(class);
    while let Some(class) = current {
        let found = class.members()?.into_iter().find(|m| filter(m));
        if let Some(member) = found {
            return Ok(Some((class, member)));
        }
        current = class.base_class()?;
    }
    Ok(None)
}

/// Walk `class` and its bases for a method with a matching name and arity.
fn find_method(class: Handle<dyn Class>, name: &str, arguments: usize) -> Result<Option<(Handle<dyn Class>, MethodInfo)>>
{
    let mut current = Some(class);
    while let Some(class) = current {
        if let Some(method) = class.methods(name)?.into_iter().find(|m| m.parameter_count == arguments) {
            return Ok(Some((class, method)));
        }
        current = class.base_class()?;
    }
    Ok(None)
}

fn class_name(value: &dyn Value) -> Result<String>
{
    Ok(match value.class()? {
        Some(class) => class.name()?,
        None => "object".to_string(),
    })
}

fn mismatch(value: &Handle<dyn Value>, location: &dyn Value) -> Result<DebuggerError>
{
    Ok(EvalError::TypeMismatch {
        from: class_name(&**value)?,
        to: class_name(location)?,
    }
    .into())
}

fn display_text(value: &dyn Value) -> Result<String>
{
    let element_type = value.element_type()?;
    if element_type == ElementType::Void {
        return Ok("Expression has been evaluated and has no value".to_string());
    }
    if value.is_null()? {
        return Ok("null".to_string());
    }
    match element_type {
        ElementType::Class | ElementType::Object | ElementType::Array => Ok(format!("{{{}}}", class_name(value)?)),
        ElementType::ValueType => match value.read() {
            Ok(data) => Ok(data.to_string()),
            Err(_) => Ok(format!("{{{}}}", class_name(value)?)),
        },
        _ => Ok(value.read()?.to_string()),
    }
}

/// Primitive type named by a cast, by keyword or by core library name.
fn cast_target(name: &str) -> Option<ElementType>
{
    let keyword = match name {
        "bool" => Some(ElementType::Boolean),
        "char" => Some(ElementType::Char),
        "sbyte" => Some(ElementType::I1),
        "byte" => Some(ElementType::U1),
        "short" => Some(ElementType::I2),
        "ushort" => Some(ElementType::U2),
        "int" => Some(ElementType::I4),
        "uint" => Some(ElementType::U4),
        "long" => Some(ElementType::I8),
        "ulong" => Some(ElementType::U8),
        "float" => Some(ElementType::R4),
        "double" => Some(ElementType::R8),
        "nint" => Some(ElementType::IntPtr),
        "nuint" => Some(ElementType::UIntPtr),
        "string" => Some(ElementType::String),
        "object" => Some(ElementType::Object),
        _ => None,
    };
    keyword.or_else(|| {
        ElementType::PRIMITIVES
            .into_iter()
            .chain([ElementType::String])
            .find(|t| t.core_type_name() == Some(name))
    })
}
