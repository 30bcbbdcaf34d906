//! # Mock Runtime
//!
//! Deterministic, in-memory test doubles for the runtime debugging API, the
//! symbol service and the expression compiler.
//!
//! Every object handed out through a [`Handle`] is counted in a reference
//! ledger, so tests can assert that each acquired reference was released
//! ([`MockRuntime::outstanding_refs`]). Function evaluations run registered
//! closures and report completion through the attached [`EvalWaiter`], either
//! immediately or once the test releases them.
//!
//! Frames of a [`MockThread`] are pushed innermost first: the first pushed
//! frame is level 0.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::{
    Class, DebugRuntime, Frame, FuncEvalCall, FuncEvalOutcome, Handle, MemberInfo, MemberKind, MethodInfo, Module,
    NativeBreakpoint, RuntimeObject, Thread, Value,
};
use crate::error::{DebuggerError, EvalError, Result};
use crate::eval::{EvalWaiter, ExpressionCompiler, Instruction, StackProgram};
use crate::symbols::{LocalVariable, MethodRange, MethodSymbol, SymbolLookup, SymbolService};
use crate::types::{ElementType, FieldToken, FrameLevel, MethodToken, ModuleId, ObjectId, PrimitiveValue, ThreadId, TypeToken};

/// Status returned by injected failures.
pub const E_FAIL: u32 = 0x8000_4005;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T>
{
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reference ledger and fault injection shared by every mock object.
#[derive(Default)]
struct Shared
{
    refs: Mutex<HashMap<ObjectId, i64>>,
    over_released: AtomicBool,
    faults: Mutex<HashSet<&'static str>>,
    next_id: AtomicU64,
}

impl Shared
{
    fn new_id(&self) -> ObjectId
    {
        ObjectId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn add_ref(&self, id: ObjectId)
    {
        *lock(&self.refs).entry(id).or_default() += 1;
    }

    fn release(&self, id: ObjectId)
    {
        let mut refs = lock(&self.refs);
        let count = refs.entry(id).or_default();
        *count -= 1;
        if *count < 0 {
            self.over_released.store(true, Ordering::SeqCst);
        }
    }

    fn check(&self, call: &'static str) -> Result<()>
    {
        if lock(&self.faults).contains(call) {
            Err(DebuggerError::runtime(call, E_FAIL))
        } else {
            Ok(())
        }
    }
}

fn acquire<T: ?Sized + RuntimeObject>(object: Arc<T>) -> Handle<T>
{
    object.add_ref();
    Handle::from_acquired(object)
}

macro_rules! mock_object {
    ($ty:ty) => {
        impl RuntimeObject for $ty
        {
            fn object_id(&self) -> ObjectId
            {
                self.id
            }

            fn add_ref(&self)
            {
                self.shared.add_ref(self.id);
            }

            fn release(&self)
            {
                self.shared.release(self.id);
            }

            fn as_any(&self) -> &dyn Any
            {
                self
            }
        }
    };
}

fn downcast<'a, T: 'static>(object: &'a dyn Any, call: &'static str) -> Result<&'a T>
{
    object
        .downcast_ref::<T>()
        .ok_or(DebuggerError::runtime(call, 0x8007_0057))
}

// ---------------------------------------------------------------------------
// Modules
// ---------------------------------------------------------------------------

pub struct MockModule
{
    id: ObjectId,
    shared: Arc<Shared>,
    module_id: ModuleId,
    name: String,
    entry_point: Option<MethodToken>,
    classes: Mutex<Vec<Arc<MockClass>>>,
}

mock_object!(MockModule);

impl MockModule
{
    #[must_use]
    pub fn id(&self) -> ModuleId
    {
        self.module_id
    }
}

impl Module for MockModule
{
    fn module_id(&self) -> ModuleId
    {
        self.module_id
    }

    fn name(&self) -> Result<String>
    {
        self.shared.check("GetName")?;
        Ok(self.name.clone())
    }

    fn path(&self) -> Result<String>
    {
        Ok(format!("/app/{}", self.name))
    }

    fn entry_point(&self) -> Result<Option<MethodToken>>
    {
        Ok(self.entry_point)
    }
}

// ---------------------------------------------------------------------------
// Classes
// ---------------------------------------------------------------------------

pub struct MockClass
{
    id: ObjectId,
    shared: Arc<Shared>,
    me: Weak<MockClass>,
    module_id: ModuleId,
    token: TypeToken,
    name: String,
    instance_type: ElementType,
    base: Option<Arc<MockClass>>,
    members: Vec<MemberInfo>,
    methods: Vec<MethodInfo>,
    statics: Mutex<HashMap<FieldToken, Arc<MockValue>>>,
}

mock_object!(MockClass);

impl MockClass
{
    #[must_use]
    pub fn class_name(&self) -> &str
    {
        &self.name
    }

    /// Token of a field declared by this class or one of its bases.
    #[must_use]
    pub fn field_token(&self, name: &str) -> Option<FieldToken>
    {
        self.members
            .iter()
            .find_map(|member| match member.kind {
                MemberKind::Field(token) if member.name == name => Some(token),
                _ => None,
            })
            .or_else(|| self.base.as_ref().and_then(|base| base.field_token(name)))
    }

    /// Store the value of a static field.
    pub fn set_static(&self, name: &str, value: Arc<MockValue>)
    {
        if let Some(token) = self.field_token(name) {
            lock(&self.statics).insert(token, value);
        }
    }

    fn instance_fields(&self, out: &mut Vec<FieldToken>)
    {
        if let Some(base) = &self.base {
            base.instance_fields(out);
        }
        out.extend(self.members.iter().filter(|m| !m.is_static).filter_map(|m| match m.kind {
            MemberKind::Field(token) => Some(token),
            MemberKind::Property { .. } => None,
        }));
    }

    fn arc(&self) -> Option<Arc<MockClass>>
    {
        self.me.upgrade()
    }
}

impl Class for MockClass
{
    fn type_token(&self) -> TypeToken
    {
        self.token
    }

    fn module_id(&self) -> ModuleId
    {
        self.module_id
    }

    fn name(&self) -> Result<String>
    {
        Ok(self.name.clone())
    }

    fn base_class(&self) -> Result<Option<Handle<dyn Class>>>
    {
        Ok(self.base.clone().map(|base| acquire::<dyn Class>(base)))
    }

    fn members(&self) -> Result<Vec<MemberInfo>>
    {
        Ok(self.members.clone())
    }

    fn methods(&self, name: &str) -> Result<Vec<MethodInfo>>
    {
        Ok(self.methods.iter().filter(|m| m.name == name).cloned().collect())
    }
}

/// Declaration of a mock class.
pub struct ClassSpec
{
    name: String,
    instance_type: ElementType,
    base: Option<Arc<MockClass>>,
    members: Vec<MemberInfo>,
    methods: Vec<MethodInfo>,
}

impl ClassSpec
{
    #[must_use]
    pub fn new(name: &str) -> Self
    {
        Self {
            name: name.to_string(),
            instance_type: ElementType::Class,
            base: None,
            members: Vec::new(),
            methods: Vec::new(),
        }
    }

    #[must_use]
    pub fn base(mut self, base: &Arc<MockClass>) -> Self
    {
        self.base = Some(Arc::clone(base));
        self
    }

    /// Instances are of `element_type` instead of a plain class.
    #[must_use]
    pub fn instance_type(mut self, element_type: ElementType) -> Self
    {
        self.instance_type = element_type;
        self
    }

    #[must_use]
    pub fn field(self, name: &str, token: u32) -> Self
    {
        self.member(name, MemberKind::Field(FieldToken(token)), false)
    }

    #[must_use]
    pub fn static_field(self, name: &str, token: u32) -> Self
    {
        self.member(name, MemberKind::Field(FieldToken(token)), true)
    }

    /// Property with `get_{name}` / `set_{name}` accessor methods.
    #[must_use]
    pub fn property(self, name: &str, getter: Option<u32>, setter: Option<u32>) -> Self
    {
        self.accessors(name, getter, setter, false)
    }

    #[must_use]
    pub fn static_property(self, name: &str, getter: Option<u32>, setter: Option<u32>) -> Self
    {
        self.accessors(name, getter, setter, true)
    }

    #[must_use]
    pub fn method(mut self, token: u32, name: &str, parameter_count: usize) -> Self
    {
        self.methods.push(MethodInfo {
            token: MethodToken(token),
            name: name.to_string(),
            parameter_count,
            is_static: false,
        });
        self
    }

    #[must_use]
    pub fn static_method(mut self, token: u32, name: &str, parameter_count: usize) -> Self
    {
        self.methods.push(MethodInfo {
            token: MethodToken(token),
            name: name.to_string(),
            parameter_count,
            is_static: true,
        });
        self
    }

    fn member(mut self, name: &str, kind: MemberKind, is_static: bool) -> Self
    {
        self.members.push(MemberInfo {
            name: name.to_string(),
            kind,
            is_static,
        });
        self
    }

    fn accessors(mut self, name: &str, getter: Option<u32>, setter: Option<u32>, is_static: bool) -> Self
    {
        if let Some(token) = getter {
            self.methods.push(MethodInfo {
                token: MethodToken(token),
                name: format!("get_{name}"),
                parameter_count: 0,
                is_static,
            });
        }
        if let Some(token) = setter {
            self.methods.push(MethodInfo {
                token: MethodToken(token),
                name: format!("set_{name}"),
                parameter_count: 1,
                is_static,
            });
        }
        self.member(
            name,
            MemberKind::Property {
                getter: getter.map(MethodToken),
                setter: setter.map(MethodToken),
            },
            is_static,
        )
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Payload
{
    Data(PrimitiveValue),
    Object(Arc<Mutex<HashMap<FieldToken, Arc<MockValue>>>>),
    Array(Arc<Vec<Arc<MockValue>>>),
}

#[derive(Clone)]
struct Content
{
    element_type: ElementType,
    class: Option<Arc<MockClass>>,
    payload: Payload,
}

/// A value or storage slot. Writing into it replaces its content; objects
/// and arrays keep reference semantics.
pub struct MockValue
{
    id: ObjectId,
    shared: Arc<Shared>,
    me: Weak<MockValue>,
    content: Mutex<Content>,
}

mock_object!(MockValue);

impl MockValue
{
    /// Primitive data currently stored, `None` for objects and arrays.
    #[must_use]
    pub fn data(&self) -> Option<PrimitiveValue>
    {
        match &lock(&self.content).payload {
            Payload::Data(data) => Some(data.clone()),
            Payload::Object(_) | Payload::Array(_) => None,
        }
    }

    /// Instance field slot by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<Arc<MockValue>>
    {
        let content = lock(&self.content);
        let token = content.class.as_ref()?.field_token(name)?;
        let slot = match &content.payload {
            Payload::Object(fields) => lock(&**fields).get(&token).cloned(),
            _ => None,
        };
        slot
    }

    fn arc(&self) -> Option<Arc<MockValue>>
    {
        self.me.upgrade()
    }
}

impl Value for MockValue
{
    fn element_type(&self) -> Result<ElementType>
    {
        Ok(lock(&self.content).element_type)
    }

    fn is_null(&self) -> Result<bool>
    {
        Ok(matches!(lock(&self.content).payload, Payload::Data(PrimitiveValue::Null)))
    }

    fn class(&self) -> Result<Option<Handle<dyn Class>>>
    {
        Ok(lock(&self.content).class.clone().map(|class| acquire::<dyn Class>(class)))
    }

    fn read(&self) -> Result<PrimitiveValue>
    {
        match &lock(&self.content).payload {
            Payload::Data(data) => Ok(data.clone()),
            Payload::Object(_) | Payload::Array(_) => Err(DebuggerError::runtime("GetValue", 0x8007_0057)),
        }
    }
}

/// Shape of a new mock value.
pub struct ValueSpec
{
    element_type: ElementType,
    class: Option<Arc<MockClass>>,
    payload: Payload,
}

impl ValueSpec
{
    #[must_use]
    pub fn primitive(data: PrimitiveValue) -> Self
    {
        Self {
            element_type: data.element_type(),
            class: None,
            payload: Payload::Data(data),
        }
    }

    #[must_use]
    pub fn string(text: &str) -> Self
    {
        Self::primitive(PrimitiveValue::String(text.to_string()))
    }

    /// Null reference of unknown static type.
    #[must_use]
    pub fn null() -> Self
    {
        Self::primitive(PrimitiveValue::Null)
    }

    /// Null reference statically typed as `class`.
    #[must_use]
    pub fn typed_null(class: &Arc<MockClass>) -> Self
    {
        Self {
            element_type: ElementType::Class,
            class: Some(Arc::clone(class)),
            payload: Payload::Data(PrimitiveValue::Null),
        }
    }
}

// ---------------------------------------------------------------------------
// Threads and frames
// ---------------------------------------------------------------------------

pub struct MockThread
{
    id: ObjectId,
    shared: Arc<Shared>,
    thread_id: ThreadId,
    frames: Mutex<Vec<Arc<MockFrame>>>,
    exception: Mutex<Option<Arc<MockValue>>>,
}

mock_object!(MockThread);

impl MockThread
{
    pub fn set_exception(&self, exception: Option<Arc<MockValue>>)
    {
        *lock(&self.exception) = exception;
    }

    /// Move the innermost frame to another IL offset.
    pub fn set_il_offset(&self, il_offset: u32)
    {
        if let Some(frame) = lock(&self.frames).first() {
            frame.il_offset.store(il_offset, Ordering::SeqCst);
        }
    }
}

impl Thread for MockThread
{
    fn thread_id(&self) -> ThreadId
    {
        self.thread_id
    }

    fn frame(&self, level: FrameLevel) -> Result<Handle<dyn Frame>>
    {
        self.shared.check("GetFrame")?;
        let frames = lock(&self.frames);
        let frame = frames
            .get(level.0 as usize)
            .cloned()
            .ok_or(DebuggerError::runtime("GetFrame", 0x8013_1c2d))?;
        Ok(acquire::<dyn Frame>(frame))
    }

    fn current_exception(&self) -> Result<Option<Handle<dyn Value>>>
    {
        Ok(lock(&self.exception).clone().map(|value| acquire::<dyn Value>(value)))
    }
}

pub struct MockFrame
{
    id: ObjectId,
    shared: Arc<Shared>,
    module: Arc<MockModule>,
    class: Arc<MockClass>,
    method: MethodToken,
    il_offset: AtomicU32,
    this: Option<Arc<MockValue>>,
    locals: Vec<Arc<MockValue>>,
    arguments: Vec<Arc<MockValue>>,
}

mock_object!(MockFrame);

impl Frame for MockFrame
{
    fn module(&self) -> Result<Handle<dyn Module>>
    {
        Ok(acquire::<dyn Module>(Arc::clone(&self.module) as Arc<dyn Module>))
    }

    fn method(&self) -> MethodToken
    {
        self.method
    }

    fn il_offset(&self) -> Result<u32>
    {
        Ok(self.il_offset.load(Ordering::SeqCst))
    }

    fn declaring_class(&self) -> Result<Handle<dyn Class>>
    {
        Ok(acquire::<dyn Class>(Arc::clone(&self.class) as Arc<dyn Class>))
    }

    fn this_value(&self) -> Result<Option<Handle<dyn Value>>>
    {
        Ok(self.this.clone().map(|value| acquire::<dyn Value>(value)))
    }

    fn local(&self, index: u32) -> Result<Handle<dyn Value>>
    {
        self.locals
            .get(index as usize)
            .cloned()
            .map(|value| acquire::<dyn Value>(value))
            .ok_or(DebuggerError::runtime("GetLocalVariable", 0x8013_1304))
    }

    fn argument(&self, index: u32) -> Result<Handle<dyn Value>>
    {
        self.arguments
            .get(index as usize)
            .cloned()
            .map(|value| acquire::<dyn Value>(value))
            .ok_or(DebuggerError::runtime("GetArgument", 0x8013_1304))
    }
}

/// Declaration of a mock stack frame.
pub struct FrameSpec
{
    module: Arc<MockModule>,
    class: Arc<MockClass>,
    method: MethodToken,
    il_offset: u32,
    this: Option<Arc<MockValue>>,
    locals: Vec<Arc<MockValue>>,
    arguments: Vec<Arc<MockValue>>,
}

impl FrameSpec
{
    #[must_use]
    pub fn new(module: &Arc<MockModule>, class: &Arc<MockClass>, method: u32) -> Self
    {
        Self {
            module: Arc::clone(module),
            class: Arc::clone(class),
            method: MethodToken(method),
            il_offset: 0,
            this: None,
            locals: Vec::new(),
            arguments: Vec::new(),
        }
    }

    #[must_use]
    pub fn il_offset(mut self, il_offset: u32) -> Self
    {
        self.il_offset = il_offset;
        self
    }

    #[must_use]
    pub fn this(mut self, this: &Arc<MockValue>) -> Self
    {
        self.this = Some(Arc::clone(this));
        self
    }

    #[must_use]
    pub fn local(mut self, value: &Arc<MockValue>) -> Self
    {
        self.locals.push(Arc::clone(value));
        self
    }

    #[must_use]
    pub fn argument(mut self, value: &Arc<MockValue>) -> Self
    {
        self.arguments.push(Arc::clone(value));
        self
    }
}

// ---------------------------------------------------------------------------
// Native breakpoints
// ---------------------------------------------------------------------------

pub struct MockBreakpoint
{
    id: ObjectId,
    shared: Arc<Shared>,
    site: BreakpointSite,
    active: AtomicBool,
}

mock_object!(MockBreakpoint);

impl NativeBreakpoint for MockBreakpoint
{
    fn activate(&self, active: bool) -> Result<()>
    {
        self.shared.check("Activate")?;
        self.active.store(active, Ordering::SeqCst);
        Ok(())
    }

    fn is_active(&self) -> Result<bool>
    {
        Ok(self.active.load(Ordering::SeqCst))
    }
}

/// Where a native breakpoint was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BreakpointSite
{
    pub module: ModuleId,
    pub method: MethodToken,
    pub version: u32,
    pub il_offset: u32,
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// Arguments passed to a registered mock function.
pub struct MockCall
{
    pub receiver: Option<Arc<MockValue>>,
    pub arguments: Vec<Arc<MockValue>>,
}

/// `Ok(return value)` or `Err(exception object)`.
pub type MockEvalResult = std::result::Result<Option<Arc<MockValue>>, Arc<MockValue>>;

pub type MockFunction = Arc<dyn Fn(&MockRuntime, &MockCall) -> MockEvalResult + Send + Sync>;

/// In-memory [`DebugRuntime`].
#[derive(Default)]
pub struct MockRuntime
{
    shared: Arc<Shared>,
    next_module: AtomicU64,
    next_type: AtomicU32,
    modules: Mutex<Vec<Arc<MockModule>>>,
    breakpoints: Mutex<Vec<Arc<MockBreakpoint>>>,
    versions: Mutex<HashMap<(ModuleId, MethodToken), u32>>,
    functions: Mutex<HashMap<(ModuleId, MethodToken), MockFunction>>,
    func_evals: Mutex<Vec<MethodToken>>,
    writes: AtomicUsize,
    aborts: AtomicUsize,
    waiter: Mutex<Weak<EvalWaiter>>,
    held: Mutex<Option<Vec<(ThreadId, FuncEvalOutcome)>>>,
}

impl MockRuntime
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    // -- ledger and faults ---------------------------------------------------

    /// Runtime references currently held through handles.
    #[must_use]
    pub fn outstanding_refs(&self) -> i64
    {
        lock(&self.shared.refs).values().sum()
    }

    /// Whether any object was released more often than acquired.
    #[must_use]
    pub fn over_released(&self) -> bool
    {
        self.shared.over_released.load(Ordering::SeqCst)
    }

    /// Make every later call named `call` fail with [`E_FAIL`].
    pub fn fail_on(&self, call: &'static str)
    {
        lock(&self.shared.faults).insert(call);
    }

    pub fn clear_faults(&self)
    {
        lock(&self.shared.faults).clear();
    }

    // -- objects -------------------------------------------------------------

    #[must_use]
    pub fn value(&self, spec: ValueSpec) -> Arc<MockValue>
    {
        self.new_value(Content {
            element_type: spec.element_type,
            class: spec.class,
            payload: spec.payload,
        })
    }

    /// New instance of `class`; fields not listed start out null.
    #[must_use]
    pub fn object(&self, class: &Arc<MockClass>, fields: &[(&str, Arc<MockValue>)]) -> Arc<MockValue>
    {
        let mut tokens = Vec::new();
        class.instance_fields(&mut tokens);
        let mut slots: HashMap<FieldToken, Arc<MockValue>> =
            tokens.into_iter().map(|token| (token, self.value(ValueSpec::null()))).collect();
        for (name, value) in fields {
            if let Some(token) = class.field_token(name) {
                let slot = self.new_value(lock(&value.content).clone());
                slots.insert(token, slot);
            }
        }
        self.new_value(Content {
            element_type: class.instance_type,
            class: Some(Arc::clone(class)),
            payload: Payload::Object(Arc::new(Mutex::new(slots))),
        })
    }

    #[must_use]
    pub fn array(&self, items: Vec<Arc<MockValue>>) -> Arc<MockValue>
    {
        self.new_value(Content {
            element_type: ElementType::Array,
            class: None,
            payload: Payload::Array(Arc::new(items)),
        })
    }

    fn new_value(&self, content: Content) -> Arc<MockValue>
    {
        let shared = Arc::clone(&self.shared);
        let id = shared.new_id();
        Arc::new_cyclic(|me| MockValue {
            id,
            shared,
            me: me.clone(),
            content: Mutex::new(content),
        })
    }

    #[must_use]
    pub fn handle_to(&self, value: &Arc<MockValue>) -> Handle<dyn Value>
    {
        acquire::<dyn Value>(Arc::clone(value) as Arc<dyn Value>)
    }

    #[must_use]
    pub fn thread_handle(&self, thread: &Arc<MockThread>) -> Handle<dyn Thread>
    {
        acquire::<dyn Thread>(Arc::clone(thread) as Arc<dyn Thread>)
    }

    #[must_use]
    pub fn module_handle(&self, module: &Arc<MockModule>) -> Handle<dyn Module>
    {
        acquire::<dyn Module>(Arc::clone(module) as Arc<dyn Module>)
    }

    // -- modules and classes -------------------------------------------------

    pub fn load_module(&self, name: &str) -> Arc<MockModule>
    {
        self.load(name, None)
    }

    pub fn load_entry_module(&self, name: &str, entry_point: u32) -> Arc<MockModule>
    {
        self.load(name, Some(MethodToken(entry_point)))
    }

    fn load(&self, name: &str, entry_point: Option<MethodToken>) -> Arc<MockModule>
    {
        let module = Arc::new(MockModule {
            id: self.shared.new_id(),
            shared: Arc::clone(&self.shared),
            module_id: ModuleId(self.next_module.fetch_add(1, Ordering::Relaxed) + 1),
            name: name.to_string(),
            entry_point,
            classes: Mutex::new(Vec::new()),
        });
        lock(&self.modules).push(Arc::clone(&module));
        module
    }

    pub fn unload_module(&self, module: &Arc<MockModule>)
    {
        lock(&self.modules).retain(|m| m.module_id != module.module_id);
    }

    /// Load the core library with every predefined class.
    pub fn load_core_library(&self) -> Arc<MockModule>
    {
        let module = self.load_module(crate::eval::CORE_LIBRARY);
        let object = self.define_class(&module, ClassSpec::new("System.Object"));
        for element_type in ElementType::PRIMITIVES.into_iter().chain([ElementType::String, ElementType::Void]) {
            if let Some(name) = element_type.core_type_name() {
                let _ = self.define_class(&module, ClassSpec::new(name).base(&object).instance_type(element_type));
            }
        }
        let _ = self.define_class(
            &module,
            ClassSpec::new("System.Decimal").base(&object).instance_type(ElementType::ValueType),
        );
        module
    }

    pub fn define_class(&self, module: &Arc<MockModule>, spec: ClassSpec) -> Arc<MockClass>
    {
        let shared = Arc::clone(&self.shared);
        let id = shared.new_id();
        let token = TypeToken(0x0200_0001 + self.next_type.fetch_add(1, Ordering::Relaxed));
        let class = Arc::new_cyclic(|me| MockClass {
            id,
            shared,
            me: me.clone(),
            module_id: module.module_id,
            token,
            name: spec.name,
            instance_type: spec.instance_type,
            base: spec.base,
            members: spec.members,
            methods: spec.methods,
            statics: Mutex::new(HashMap::new()),
        });
        let mut statics = Vec::new();
        for member in class.members.iter().filter(|m| m.is_static) {
            if let MemberKind::Field(token) = member.kind {
                statics.push(token);
            }
        }
        for token in statics {
            lock(&class.statics).insert(token, self.value(ValueSpec::null()));
        }
        lock(&module.classes).push(Arc::clone(&class));
        class
    }

    // -- threads -------------------------------------------------------------

    pub fn add_thread(&self, thread_id: u64) -> Arc<MockThread>
    {
        Arc::new(MockThread {
            id: self.shared.new_id(),
            shared: Arc::clone(&self.shared),
            thread_id: ThreadId(thread_id),
            frames: Mutex::new(Vec::new()),
            exception: Mutex::new(None),
        })
    }

    pub fn push_frame(&self, thread: &MockThread, spec: FrameSpec) -> Arc<MockFrame>
    {
        let frame = Arc::new(MockFrame {
            id: self.shared.new_id(),
            shared: Arc::clone(&self.shared),
            module: spec.module,
            class: spec.class,
            method: spec.method,
            il_offset: AtomicU32::new(spec.il_offset),
            this: spec.this,
            locals: spec.locals,
            arguments: spec.arguments,
        });
        lock(&thread.frames).push(Arc::clone(&frame));
        frame
    }

    // -- breakpoints and hot reload -----------------------------------------

    /// Sites of every currently active native breakpoint.
    #[must_use]
    pub fn active_breakpoints(&self) -> Vec<BreakpointSite>
    {
        lock(&self.breakpoints)
            .iter()
            .filter(|bp| bp.active.load(Ordering::SeqCst))
            .map(|bp| bp.site)
            .collect()
    }

    /// Handle to the active breakpoint at a site, as the runtime would pass it
    /// to the breakpoint callback.
    #[must_use]
    pub fn active_breakpoint_at(&self, module: ModuleId, method: u32, il_offset: u32) -> Option<Handle<dyn NativeBreakpoint>>
    {
        lock(&self.breakpoints)
            .iter()
            .find(|bp| {
                bp.active.load(Ordering::SeqCst)
                    && bp.site.module == module
                    && bp.site.method == MethodToken(method)
                    && bp.site.il_offset == il_offset
            })
            .cloned()
            .map(|bp| acquire::<dyn NativeBreakpoint>(bp))
    }

    /// Bump the edit-and-continue version of the given methods.
    pub fn apply_hot_reload(&self, module: &Arc<MockModule>, methods: &[u32])
    {
        let mut versions = lock(&self.versions);
        for method in methods {
            *versions.entry((module.module_id, MethodToken(*method))).or_insert(1) += 1;
        }
    }

    // -- function evaluation -------------------------------------------------

    /// Route eval-complete callbacks to `waiter`.
    pub fn attach_waiter(&self, waiter: &Arc<EvalWaiter>)
    {
        *lock(&self.waiter) = Arc::downgrade(waiter);
    }

    pub fn register_function<F>(&self, module: &Arc<MockModule>, method: u32, function: F)
    where
        F: Fn(&MockRuntime, &MockCall) -> MockEvalResult + Send + Sync + 'static,
    {
        lock(&self.functions).insert((module.module_id, MethodToken(method)), Arc::new(function));
    }

    /// Method tokens of every function evaluation started so far.
    #[must_use]
    pub fn func_evals(&self) -> Vec<MethodToken>
    {
        lock(&self.func_evals).clone()
    }

    #[must_use]
    pub fn writes(&self) -> usize
    {
        self.writes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn aborts(&self) -> usize
    {
        self.aborts.load(Ordering::SeqCst)
    }

    /// Keep completions back until [`release_completions`](Self::release_completions).
    pub fn hold_completions(&self)
    {
        let mut held = lock(&self.held);
        if held.is_none() {
            *held = Some(Vec::new());
        }
    }

    /// Deliver held completions and go back to immediate delivery.
    pub fn release_completions(&self)
    {
        let held = lock(&self.held).take().unwrap_or_default();
        for (thread, outcome) in held {
            self.deliver(thread, outcome);
        }
    }

    /// Whether completions are held and at least one is waiting.
    #[must_use]
    pub fn has_held_completion(&self) -> bool
    {
        lock(&self.held).as_ref().is_some_and(|held| !held.is_empty())
    }

    fn deliver(&self, thread: ThreadId, outcome: FuncEvalOutcome)
    {
        let waiter = lock(&self.waiter).upgrade();
        if let Some(waiter) = waiter {
            waiter.notify_eval_complete(thread, outcome);
        }
    }

    fn mock_value(&self, value: &dyn Value, call: &'static str) -> Result<Arc<MockValue>>
    {
        downcast::<MockValue>(value.as_any(), call)?
            .arc()
            .ok_or(DebuggerError::runtime(call, 0x8013_1c36))
    }
}

impl DebugRuntime for MockRuntime
{
    fn loaded_modules(&self) -> Result<Vec<Handle<dyn Module>>>
    {
        self.shared.check("EnumerateModules")?;
        Ok(lock(&self.modules)
            .iter()
            .map(|module| acquire::<dyn Module>(Arc::clone(module) as Arc<dyn Module>))
            .collect())
    }

    fn create_breakpoint(&self, module: &dyn Module, method: MethodToken, il_offset: u32) -> Result<Handle<dyn NativeBreakpoint>>
    {
        self.shared.check("CreateBreakpoint")?;
        let version = self.method_version(module, method)?;
        let breakpoint = Arc::new(MockBreakpoint {
            id: self.shared.new_id(),
            shared: Arc::clone(&self.shared),
            site: BreakpointSite {
                module: module.module_id(),
                method,
                version,
                il_offset,
            },
            active: AtomicBool::new(false),
        });
        lock(&self.breakpoints).push(Arc::clone(&breakpoint));
        Ok(acquire::<dyn NativeBreakpoint>(breakpoint))
    }

    fn method_version(&self, module: &dyn Module, method: MethodToken) -> Result<u32>
    {
        self.shared.check("GetVersionNumber")?;
        Ok(lock(&self.versions).get(&(module.module_id(), method)).copied().unwrap_or(1))
    }

    fn find_class(&self, module: &dyn Module, name: &str) -> Result<Option<Handle<dyn Class>>>
    {
        self.shared.check("FindClass")?;
        let module = downcast::<MockModule>(module.as_any(), "FindClass")?;
        let class = lock(&module.classes).iter().find(|class| class.name == name).cloned();
        Ok(class.map(|class| acquire::<dyn Class>(class)))
    }

    fn read_field(&self, class: &dyn Class, receiver: Option<&dyn Value>, field: FieldToken) -> Result<Handle<dyn Value>>
    {
        self.shared.check("GetFieldValue")?;
        let slot = match receiver {
            None => {
                let class = downcast::<MockClass>(class.as_any(), "GetStaticFieldValue")?;
                let slot = lock(&class.statics).get(&field).cloned();
                slot
            }
            Some(receiver) => {
                let receiver = downcast::<MockValue>(receiver.as_any(), "GetFieldValue")?;
                let content = lock(&receiver.content);
                let slot = match &content.payload {
                    Payload::Object(fields) => lock(&**fields).get(&field).cloned(),
                    _ => None,
                };
                slot
            }
        };
        slot.map(|value| acquire::<dyn Value>(value))
            .ok_or(DebuggerError::runtime("GetFieldValue", 0x8013_1303))
    }

    fn array_element(&self, array: &dyn Value, indices: &[u32]) -> Result<Handle<dyn Value>>
    {
        self.shared.check("GetElement")?;
        let array = downcast::<MockValue>(array.as_any(), "GetElement")?;
        let content = lock(&array.content);
        let element = match (&content.payload, indices) {
            (Payload::Array(items), [index]) => items
                .get(*index as usize)
                .cloned()
                .ok_or(DebuggerError::runtime("GetElement", 0x8013_1c31)),
            _ => Err(DebuggerError::runtime("GetElement", 0x8007_0057)),
        };
        element.map(|value| acquire::<dyn Value>(value))
    }

    fn write_value(&self, location: &dyn Value, source: &dyn Value) -> Result<()>
    {
        self.shared.check("SetValue")?;
        let location = downcast::<MockValue>(location.as_any(), "SetValue")?;
        let source = downcast::<MockValue>(source.as_any(), "SetValue")?;
        if location.id == source.id {
            return Ok(());
        }
        let content = lock(&source.content).clone();
        *lock(&location.content) = content;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn create_value(&self, _thread: &dyn Thread, class: &dyn Class, data: &PrimitiveValue) -> Result<Handle<dyn Value>>
    {
        self.shared.check("NewValue")?;
        let class = downcast::<MockClass>(class.as_any(), "NewValue")?
            .arc()
            .ok_or(DebuggerError::runtime("NewValue", 0x8013_1c36))?;
        let element_type = match class.instance_type {
            ElementType::Void => ElementType::Void,
            _ => data.element_type(),
        };
        let value = self.new_value(Content {
            element_type,
            class: Some(class),
            payload: Payload::Data(data.clone()),
        });
        Ok(acquire::<dyn Value>(value))
    }

    fn create_string(&self, _thread: &dyn Thread, text: &str) -> Result<Handle<dyn Value>>
    {
        self.shared.check("NewString")?;
        Ok(self.handle_to(&self.value(ValueSpec::string(text))))
    }

    fn create_null(&self, _thread: &dyn Thread) -> Result<Handle<dyn Value>>
    {
        self.shared.check("NewNull")?;
        Ok(self.handle_to(&self.value(ValueSpec::null())))
    }

    fn begin_func_eval(&self, thread: &dyn Thread, call: &FuncEvalCall<'_>) -> Result<()>
    {
        self.shared.check("CallFunction")?;
        let function = lock(&self.functions)
            .get(&(call.module, call.method))
            .cloned()
            .ok_or(DebuggerError::runtime("CallFunction", 0x8013_1c32))?;
        lock(&self.func_evals).push(call.method);

        let receiver = call
            .receiver
            .map(|value| self.mock_value(value, "CallFunction"))
            .transpose()?;
        let arguments = call
            .arguments
            .iter()
            .map(|value| self.mock_value(*value, "CallFunction"))
            .collect::<Result<Vec<_>>>()?;

        let outcome = match function(self, &MockCall { receiver, arguments }) {
            Ok(value) => FuncEvalOutcome::Returned(value.map(|value| acquire::<dyn Value>(value))),
            Err(exception) => FuncEvalOutcome::Threw(acquire::<dyn Value>(exception)),
        };

        let thread = thread.thread_id();
        let immediate = match lock(&self.held).as_mut() {
            Some(held) => {
                held.push((thread, outcome));
                None
            }
            None => Some(outcome),
        };
        if let Some(outcome) = immediate {
            self.deliver(thread, outcome);
        }
        Ok(())
    }

    fn abort_func_eval(&self, _thread: &dyn Thread) -> Result<()>
    {
        self.shared.check("Abort")?;
        self.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Symbols
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ModuleSymbols
{
    methods: Vec<MethodSymbol>,
    ranges: Vec<(String, MethodRange)>,
    locals: HashMap<MethodToken, Vec<LocalVariable>>,
    parameters: HashMap<MethodToken, Vec<String>>,
}

/// In-memory [`SymbolService`] keyed by module file name.
#[derive(Default)]
pub struct MockSymbols
{
    modules: Mutex<HashMap<String, ModuleSymbols>>,
    failing: AtomicBool,
}

impl MockSymbols
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    fn with_module(&self, module: &str, update: impl FnOnce(&mut ModuleSymbols))
    {
        update(lock(&self.modules).entry(module.to_string()).or_default());
    }

    /// Mark `module` as having (possibly empty) symbols.
    pub fn add_module(&self, module: &str)
    {
        self.with_module(module, |_| {});
    }

    pub fn add_method(&self, module: &str, token: u32, qualified_name: &str, signature: &str)
    {
        self.with_module(module, |symbols| {
            symbols.methods.push(MethodSymbol {
                token: MethodToken(token),
                qualified_name: qualified_name.to_string(),
                signature: signature.to_string(),
            });
        });
    }

    /// Replace the source extent of `range.method` in `file`.
    pub fn set_range(&self, module: &str, file: &str, range: MethodRange)
    {
        self.with_module(module, |symbols| {
            symbols.ranges.retain(|(_, existing)| existing.method != range.method);
            symbols.ranges.push((file.to_string(), range));
        });
    }

    pub fn set_locals(&self, module: &str, method: u32, locals: &[(u32, &str, u32, u32)])
    {
        let locals = locals
            .iter()
            .map(|&(index, name, il_start, il_end)| LocalVariable {
                index,
                name: name.to_string(),
                il_start,
                il_end,
            })
            .collect();
        self.with_module(module, |symbols| {
            symbols.locals.insert(MethodToken(method), locals);
        });
    }

    pub fn set_parameters(&self, module: &str, method: u32, names: &[&str])
    {
        let names = names.iter().map(ToString::to_string).collect();
        self.with_module(module, |symbols| {
            symbols.parameters.insert(MethodToken(method), names);
        });
    }

    /// Make every query fail.
    pub fn set_failing(&self, failing: bool)
    {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn query<T>(&self, module: &dyn Module, answer: impl FnOnce(&ModuleSymbols) -> T) -> Result<SymbolLookup<T>>
    {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DebuggerError::Symbols("symbol reader unavailable".to_string()));
        }
        let name = module.name()?;
        Ok(match lock(&self.modules).get(&name) {
            Some(symbols) => SymbolLookup::Found(answer(symbols)),
            None => SymbolLookup::NoSymbols,
        })
    }
}

impl SymbolService for MockSymbols
{
    fn has_symbols(&self, module: &dyn Module) -> bool
    {
        module.name().is_ok_and(|name| lock(&self.modules).contains_key(&name))
    }

    fn find_methods(&self, module: &dyn Module, name: &str) -> Result<SymbolLookup<Vec<MethodSymbol>>>
    {
        let suffix = format!(".{name}");
        self.query(module, |symbols| {
            symbols
                .methods
                .iter()
                .filter(|m| m.qualified_name == name || m.qualified_name.ends_with(&suffix))
                .cloned()
                .collect()
        })
    }

    fn methods_for_line(&self, module: &dyn Module, file: &str, line: u32) -> Result<SymbolLookup<Vec<MethodRange>>>
    {
        self.query(module, |symbols| {
            symbols
                .ranges
                .iter()
                .filter(|(path, range)| path == file && range.contains_line(line))
                .map(|(_, range)| range.clone())
                .collect()
        })
    }

    fn local_variables(&self, module: &dyn Module, method: MethodToken) -> Result<Vec<LocalVariable>>
    {
        Ok(self
            .query(module, |symbols| symbols.locals.get(&method).cloned().unwrap_or_default())?
            .found()
            .unwrap_or_default())
    }

    fn parameter_names(&self, module: &dyn Module, method: MethodToken) -> Result<Vec<String>>
    {
        Ok(self
            .query(module, |symbols| symbols.parameters.get(&method).cloned().unwrap_or_default())?
            .found()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Compiler
// ---------------------------------------------------------------------------

/// [`ExpressionCompiler`] answering from a table of precompiled programs.
#[derive(Default)]
pub struct MockCompiler
{
    programs: Mutex<HashMap<String, StackProgram>>,
}

impl MockCompiler
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn define(&self, expression: &str, program: impl IntoIterator<Item = Instruction>)
    {
        lock(&self.programs).insert(expression.to_string(), program.into_iter().collect());
    }
}

impl ExpressionCompiler for MockCompiler
{
    fn compile(&self, expression: &str) -> std::result::Result<StackProgram, EvalError>
    {
        lock(&self.programs)
            .get(expression)
            .cloned()
            .ok_or_else(|| EvalError::Compile(format!("error CS1525: Invalid expression term '{expression}'")))
    }
}
