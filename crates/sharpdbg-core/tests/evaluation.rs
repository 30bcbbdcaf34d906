//! Tests for expression evaluation against a stopped thread

use std::sync::Arc;

use sharpdbg_core::eval::{BinaryOp, Instruction, UnaryOp};
use sharpdbg_core::runtime::mock::{ClassSpec, FrameSpec, MockClass, MockCompiler, MockModule, MockRuntime, MockSymbols, MockThread, MockValue, ValueSpec};
use sharpdbg_core::types::{EvalFlags, FrameLevel, MethodToken, PrimitiveValue};
use sharpdbg_core::{DebuggerError, EvalError, EvalStackMachine, EvalWaiter};

const MAIN: u32 = 0x0600_0001;
const GET_NAME: u32 = 0x0600_0010;
const SET_NAME: u32 = 0x0600_0011;
const GET_BROKEN: u32 = 0x0600_0012;
const GREET: u32 = 0x0600_0013;
const LOG: u32 = 0x0600_0014;

struct Fixture
{
    runtime: Arc<MockRuntime>,
    compiler: Arc<MockCompiler>,
    machine: EvalStackMachine,
    app: Arc<MockModule>,
    thread: Arc<MockThread>,
    person_class: Arc<MockClass>,
    /// Local `x` (index 0).
    x: Arc<MockValue>,
    /// Local `person` (index 1).
    person: Arc<MockValue>,
    /// Local `missing` (index 2), a null `App.Person`.
    missing: Arc<MockValue>,
}

/// A thread stopped in static `App.Program.Main` with three locals.
fn fixture() -> Fixture
{
    let runtime = Arc::new(MockRuntime::new());
    let symbols = Arc::new(MockSymbols::new());
    let compiler = Arc::new(MockCompiler::new());
    let waiter = Arc::new(EvalWaiter::new());
    runtime.attach_waiter(&waiter);
    let machine = EvalStackMachine::new(runtime.clone(), symbols.clone(), compiler.clone(), waiter);

    let core = runtime.load_core_library();
    machine.find_predefined_types(&*runtime.module_handle(&core)).unwrap();

    let app = runtime.load_module("App.dll");
    let program = runtime.define_class(&app, ClassSpec::new("App.Program"));
    let person_class = person_class(&runtime, &app);
    let settings = runtime.define_class(&app, ClassSpec::new("App.Settings").static_field("Retries", 0x0400_0010));
    settings.set_static("Retries", runtime.value(ValueSpec::primitive(PrimitiveValue::I4(3))));

    symbols.set_locals("App.dll", MAIN, &[(0, "x", 0, 100), (1, "person", 0, 100), (2, "missing", 0, 100)]);
    let x = runtime.value(ValueSpec::primitive(PrimitiveValue::I4(5)));
    let age = runtime.value(ValueSpec::primitive(PrimitiveValue::I4(36)));
    let friend_age = runtime.value(ValueSpec::primitive(PrimitiveValue::I4(41)));
    let friend = runtime.object(&person_class, &[("Age", friend_age)]);
    let scores = runtime.array(
        [10, 20, 30]
            .into_iter()
            .map(|score| runtime.value(ValueSpec::primitive(PrimitiveValue::I4(score))))
            .collect(),
    );
    let person = runtime.object(&person_class, &[("Age", age), ("Friend", friend), ("Scores", scores)]);
    let missing = runtime.value(ValueSpec::typed_null(&person_class));

    let thread = runtime.add_thread(1);
    runtime.push_frame(
        &thread,
        FrameSpec::new(&app, &program, MAIN).il_offset(8).local(&x).local(&person).local(&missing),
    );

    Fixture {
        runtime,
        compiler,
        machine,
        app,
        thread,
        person_class,
        x,
        person,
        missing,
    }
}

fn person_class(runtime: &MockRuntime, app: &Arc<MockModule>) -> Arc<MockClass>
{
    runtime.define_class(
        app,
        ClassSpec::new("App.Person")
            .field("Age", 0x0400_0001)
            .field("Friend", 0x0400_0002)
            .field("Scores", 0x0400_0003)
            .property("Name", Some(GET_NAME), Some(SET_NAME))
            .property("Broken", Some(GET_BROKEN), None)
            .method(GREET, "Greet", 1)
            .method(LOG, "Log", 0),
    )
}

fn path(names: &[&str]) -> Vec<Instruction>
{
    let mut program = vec![Instruction::Identifier(names[0].to_string())];
    program.extend(names[1..].iter().map(|name| Instruction::MemberAccess((*name).to_string())));
    program
}

fn evaluate(f: &Fixture, expression: &str) -> sharpdbg_core::Result<String>
{
    f.machine
        .evaluate_expression(&*f.thread, FrameLevel(0), EvalFlags::NONE, expression)
        .map(|result| result.display)
}

#[test]
fn test_evaluate_local_and_arithmetic()
{
    let f = fixture();
    f.compiler.define("x", path(&["x"]));
    f.compiler.define(
        "x * 2 + 1",
        [
            Instruction::Identifier("x".to_string()),
            Instruction::Literal(PrimitiveValue::I4(2)),
            Instruction::Binary(BinaryOp::Multiply),
            Instruction::Literal(PrimitiveValue::I4(1)),
            Instruction::Binary(BinaryOp::Add),
        ],
    );

    let result = f.machine.evaluate_expression(&*f.thread, FrameLevel(0), EvalFlags::NONE, "x").unwrap();
    assert_eq!(result.display, "5");
    assert!(result.editable);
    assert_eq!(evaluate(&f, "x * 2 + 1").unwrap(), "11");
}

#[test]
fn test_evaluate_field_of_local_object()
{
    let f = fixture();
    f.compiler.define("person.Age", path(&["person", "Age"]));
    assert_eq!(evaluate(&f, "person.Age").unwrap(), "36");
}

#[test]
fn test_null_conditional_short_circuits_the_rest_of_the_path()
{
    let f = fixture();
    f.compiler.define(
        "missing?.Friend.Age",
        [
            Instruction::Identifier("missing".to_string()),
            Instruction::ConditionalAccess,
            Instruction::MemberAccess("Friend".to_string()),
            Instruction::MemberAccess("Age".to_string()),
        ],
    );
    f.compiler.define("missing.Friend", path(&["missing", "Friend"]));

    assert_eq!(evaluate(&f, "missing?.Friend.Age").unwrap(), "null");
    let err = evaluate(&f, "missing.Friend").unwrap_err();
    assert!(matches!(err, DebuggerError::Eval(EvalError::NullReference(ref name)) if name == "Friend"));
}

#[test]
fn test_unknown_identifier()
{
    let f = fixture();
    f.compiler.define("nope", path(&["nope"]));
    let err = evaluate(&f, "nope").unwrap_err();
    assert!(matches!(err, DebuggerError::Eval(EvalError::UnknownIdentifier(ref name)) if name == "nope"));
}

#[test]
fn test_compile_error_is_reported()
{
    let f = fixture();
    let err = evaluate(&f, "x +").unwrap_err();
    assert!(matches!(err, DebuggerError::Eval(EvalError::Compile(_))));
}

#[test]
fn test_static_member_through_class_path()
{
    let f = fixture();
    f.compiler.define("App.Settings.Retries", path(&["App", "Settings", "Retries"]));
    assert_eq!(evaluate(&f, "App.Settings.Retries").unwrap(), "3");
}

#[test]
fn test_property_getter_runs_in_debuggee()
{
    let f = fixture();
    f.runtime
        .register_function(&f.app, GET_NAME, |runtime, _call| Ok(Some(runtime.value(ValueSpec::string("Ada")))));
    f.compiler.define("person.Name", path(&["person", "Name"]));

    let result = f
        .machine
        .evaluate_expression(&*f.thread, FrameLevel(0), EvalFlags::NONE, "person.Name")
        .unwrap();
    assert_eq!(result.display, "\"Ada\"");
    assert!(result.editable);
    let setter = result.setter.expect("property with a setter");
    assert_eq!(setter.setter, MethodToken(SET_NAME));
    assert_eq!(f.runtime.func_evals(), vec![MethodToken(GET_NAME)]);
}

#[test]
fn test_getter_refused_without_func_eval()
{
    let f = fixture();
    f.compiler.define("person.Name", path(&["person", "Name"]));
    let err = f
        .machine
        .evaluate_expression(&*f.thread, FrameLevel(0), EvalFlags::NO_FUNC_EVAL, "person.Name")
        .unwrap_err();
    assert!(matches!(err, DebuggerError::Eval(EvalError::FuncEvalDisabled)));
    assert!(f.runtime.func_evals().is_empty());
}

#[test]
fn test_getter_exception_is_reported_by_type()
{
    let f = fixture();
    let exception_class = f.runtime.define_class(&f.app, ClassSpec::new("System.InvalidOperationException"));
    f.runtime
        .register_function(&f.app, GET_BROKEN, move |runtime, _call| Err(runtime.object(&exception_class, &[])));
    f.compiler.define("person.Broken", path(&["person", "Broken"]));

    let err = evaluate(&f, "person.Broken").unwrap_err();
    assert!(matches!(
        err,
        DebuggerError::Eval(EvalError::ExceptionThrown { ref type_name }) if type_name == "System.InvalidOperationException"
    ));
}

#[test]
fn test_set_local_from_literal()
{
    let f = fixture();
    f.compiler.define("x", path(&["x"]));
    f.compiler.define("42", [Instruction::Literal(PrimitiveValue::I4(42))]);

    let result = f
        .machine
        .set_value_by_expression(&*f.thread, FrameLevel(0), EvalFlags::NONE, "x", "42")
        .unwrap();
    assert_eq!(result.display, "42");
    assert_eq!(f.x.data(), Some(PrimitiveValue::I4(42)));
    assert_eq!(f.runtime.writes(), 1);
}

#[test]
fn test_set_field_of_local_object()
{
    let f = fixture();
    f.compiler.define("person.Age", path(&["person", "Age"]));
    f.compiler.define("37", [Instruction::Literal(PrimitiveValue::I4(37))]);

    f.machine
        .set_value_by_expression(&*f.thread, FrameLevel(0), EvalFlags::NONE, "person.Age", "37")
        .unwrap();
    let age = f.person.field("Age").expect("Age field");
    assert_eq!(age.data(), Some(PrimitiveValue::I4(37)));
}

#[test]
fn test_set_property_calls_setter()
{
    let f = fixture();
    f.runtime
        .register_function(&f.app, GET_NAME, |runtime, _call| Ok(Some(runtime.value(ValueSpec::string("Ada")))));
    let assigned = Arc::new(std::sync::Mutex::new(None));
    let sink = Arc::clone(&assigned);
    f.runtime.register_function(&f.app, SET_NAME, move |_runtime, call| {
        *sink.lock().unwrap() = call.arguments.first().and_then(|value| value.data());
        Ok(None)
    });
    f.compiler.define("person.Name", path(&["person", "Name"]));
    f.compiler.define("\"Grace\"", [Instruction::Literal(PrimitiveValue::String("Grace".to_string()))]);

    f.machine
        .set_value_by_expression(&*f.thread, FrameLevel(0), EvalFlags::NONE, "person.Name", "\"Grace\"")
        .unwrap();
    assert_eq!(*assigned.lock().unwrap(), Some(PrimitiveValue::String("Grace".to_string())));
    assert_eq!(f.runtime.func_evals(), vec![MethodToken(GET_NAME), MethodToken(SET_NAME)]);
}

#[test]
fn test_set_on_non_editable_target_skips_value()
{
    let f = fixture();
    f.compiler.define(
        "x + 1",
        [
            Instruction::Identifier("x".to_string()),
            Instruction::Literal(PrimitiveValue::I4(1)),
            Instruction::Binary(BinaryOp::Add),
        ],
    );
    f.compiler.define("1", [Instruction::Literal(PrimitiveValue::I4(1))]);
    f.compiler.define(
        "missing?.Age",
        [
            Instruction::Identifier("missing".to_string()),
            Instruction::ConditionalAccess,
            Instruction::MemberAccess("Age".to_string()),
        ],
    );

    // The value expression is never compiled for a non-editable target.
    for target in ["1", "x + 1", "missing?.Age"] {
        let err = f
            .machine
            .set_value_by_expression(&*f.thread, FrameLevel(0), EvalFlags::NONE, target, "not compiled")
            .unwrap_err();
        assert!(
            matches!(err, DebuggerError::Eval(EvalError::NotEditable(ref name)) if name == target),
            "{target}: {err}"
        );
    }
    assert_eq!(f.runtime.writes(), 0);
    assert_eq!(f.missing.data(), Some(PrimitiveValue::Null));
}

#[test]
fn test_set_rejects_incompatible_value()
{
    let f = fixture();
    f.compiler.define("x", path(&["x"]));
    f.compiler.define("person", path(&["person"]));

    let err = f
        .machine
        .set_value_by_expression(&*f.thread, FrameLevel(0), EvalFlags::NONE, "x", "person")
        .unwrap_err();
    assert!(matches!(err, DebuggerError::Eval(EvalError::TypeMismatch { .. })));
    assert_eq!(f.x.data(), Some(PrimitiveValue::I4(5)));
}

#[test]
fn test_evaluation_before_core_library_loads()
{
    let runtime = Arc::new(MockRuntime::new());
    let compiler = Arc::new(MockCompiler::new());
    let machine = EvalStackMachine::new(runtime.clone(), Arc::new(MockSymbols::new()), compiler.clone(), Arc::new(EvalWaiter::new()));
    compiler.define("1", [Instruction::Literal(PrimitiveValue::I4(1))]);
    let thread = runtime.add_thread(1);

    let err = machine
        .evaluate_expression(&*thread, FrameLevel(0), EvalFlags::NONE, "1")
        .unwrap_err();
    assert!(matches!(err, DebuggerError::PredefinedTypesNotReady));
    assert!(!machine.predefined_types_ready());
}

#[test]
fn test_predefined_types_are_discovered_once()
{
    let f = fixture();
    let core = f.runtime.load_core_library();
    let err = f.machine.find_predefined_types(&*f.runtime.module_handle(&core)).unwrap_err();
    assert!(matches!(err, DebuggerError::InvalidState(_)));
    assert!(f.machine.predefined_types_ready());
}

fn conditional(receiver: &str, members: &[&str]) -> Vec<Instruction>
{
    let mut program = vec![Instruction::Identifier(receiver.to_string()), Instruction::ConditionalAccess];
    program.extend(members.iter().map(|name| Instruction::MemberAccess((*name).to_string())));
    program
}

#[test]
fn test_null_conditional_result_is_not_editable()
{
    let f = fixture();
    f.compiler.define("missing?.Name", conditional("missing", &["Name"]));
    f.compiler.define("missing?.Age", conditional("missing", &["Age"]));

    for expression in ["missing?.Name", "missing?.Age"] {
        let result = f
            .machine
            .evaluate_expression(&*f.thread, FrameLevel(0), EvalFlags::NONE, expression)
            .unwrap();
        assert_eq!(result.display, "null", "{expression}");
        assert!(!result.editable, "{expression}");
        assert!(result.setter.is_none(), "{expression}");
    }
    assert!(f.runtime.func_evals().is_empty());
}

#[test]
fn test_null_conditional_on_non_null_receiver_binds_the_path()
{
    let f = fixture();
    f.compiler.define("person?.Friend.Age", conditional("person", &["Friend", "Age"]));

    let result = f
        .machine
        .evaluate_expression(&*f.thread, FrameLevel(0), EvalFlags::NONE, "person?.Friend.Age")
        .unwrap();
    assert_eq!(result.display, "41");
    assert!(result.editable);
}

#[test]
fn test_null_conditional_skips_calls_and_getters()
{
    let f = fixture();
    f.runtime
        .register_function(&f.app, GREET, |runtime, _call| Ok(Some(runtime.value(ValueSpec::string("hi")))));
    let mut call = conditional("missing", &["Greet"]);
    call.push(Instruction::Literal(PrimitiveValue::String("Ada".to_string())));
    call.push(Instruction::Call { arguments: 1 });
    f.compiler.define("missing?.Greet(\"Ada\")", call);
    f.compiler.define("missing?.Name", conditional("missing", &["Name"]));

    assert_eq!(evaluate(&f, "missing?.Greet(\"Ada\")").unwrap(), "null");
    assert_eq!(evaluate(&f, "missing?.Name").unwrap(), "null");
    assert!(f.runtime.func_evals().is_empty());
}

#[test]
fn test_this_of_instance_frame()
{
    let f = fixture();
    let worker = f.runtime.add_thread(2);
    f.runtime.push_frame(&worker, FrameSpec::new(&f.app, &f.person_class, GREET).this(&f.person));
    f.compiler.define("this.Age", [Instruction::This, Instruction::MemberAccess("Age".to_string())]);
    f.compiler.define("this", [Instruction::This]);

    let age = f
        .machine
        .evaluate_expression(&*worker, FrameLevel(0), EvalFlags::NONE, "this.Age")
        .unwrap();
    assert_eq!(age.display, "36");
    assert!(age.editable);

    let this = f
        .machine
        .evaluate_expression(&*worker, FrameLevel(0), EvalFlags::NONE, "this")
        .unwrap();
    assert_eq!(this.display, "{App.Person}");
    assert!(!this.editable);

    // `App.Program.Main` is static.
    let err = evaluate(&f, "this").unwrap_err();
    assert!(matches!(err, DebuggerError::Eval(EvalError::UnknownIdentifier(ref name)) if name == "this"));
}

#[test]
fn test_unary_and_cast()
{
    let f = fixture();
    f.compiler.define("-x", [Instruction::Identifier("x".to_string()), Instruction::Unary(UnaryOp::Negate)]);
    f.compiler.define(
        "(byte)300",
        [Instruction::Literal(PrimitiveValue::I4(300)), Instruction::Cast("byte".to_string())],
    );
    f.compiler.define(
        "(System.Int64)x",
        [Instruction::Identifier("x".to_string()), Instruction::Cast("System.Int64".to_string())],
    );
    f.compiler.define(
        "(Widget)x",
        [Instruction::Identifier("x".to_string()), Instruction::Cast("Widget".to_string())],
    );

    let negated = f.machine.evaluate_expression(&*f.thread, FrameLevel(0), EvalFlags::NONE, "-x").unwrap();
    assert_eq!(negated.display, "-5");
    assert!(!negated.editable);
    assert_eq!(evaluate(&f, "(byte)300").unwrap(), "44");
    let widened = f
        .machine
        .evaluate_expression(&*f.thread, FrameLevel(0), EvalFlags::NONE, "(System.Int64)x")
        .unwrap();
    assert_eq!(widened.value.read().unwrap(), PrimitiveValue::I8(5));
    let err = evaluate(&f, "(Widget)x").unwrap_err();
    assert!(matches!(err, DebuggerError::Eval(EvalError::TypeMismatch { ref to, .. }) if to == "Widget"));
}

#[test]
fn test_array_element_access()
{
    let f = fixture();
    let mut index = path(&["person", "Scores"]);
    index.push(Instruction::Literal(PrimitiveValue::I4(1)));
    index.push(Instruction::Index { arguments: 1 });
    f.compiler.define("person.Scores[1]", index);
    let mut outside = path(&["person", "Scores"]);
    outside.push(Instruction::Literal(PrimitiveValue::I4(-1)));
    outside.push(Instruction::Index { arguments: 1 });
    f.compiler.define("person.Scores[-1]", outside);

    let element = f
        .machine
        .evaluate_expression(&*f.thread, FrameLevel(0), EvalFlags::NONE, "person.Scores[1]")
        .unwrap();
    assert_eq!(element.display, "20");
    assert!(element.editable);
    assert!(matches!(evaluate(&f, "person.Scores[-1]").unwrap_err(), DebuggerError::Eval(EvalError::Operator(_))));
}

#[test]
fn test_method_call_passes_receiver_and_arguments()
{
    let f = fixture();
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    f.runtime.register_function(&f.app, GREET, move |runtime, call| {
        let receiver_age = call.receiver.as_ref().and_then(|r| r.field("Age")).and_then(|age| age.data());
        sink.lock().unwrap().push((receiver_age, call.arguments.first().and_then(|a| a.data())));
        Ok(Some(runtime.value(ValueSpec::string("Hello, Ada"))))
    });
    let mut call = path(&["person", "Greet"]);
    call.push(Instruction::Literal(PrimitiveValue::String("Ada".to_string())));
    call.push(Instruction::Call { arguments: 1 });
    f.compiler.define("person.Greet(\"Ada\")", call);
    f.compiler.define("1", [Instruction::Literal(PrimitiveValue::I4(1))]);

    let result = f
        .machine
        .evaluate_expression(&*f.thread, FrameLevel(0), EvalFlags::NONE, "person.Greet(\"Ada\")")
        .unwrap();
    assert_eq!(result.display, "\"Hello, Ada\"");
    assert!(!result.editable);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(Some(PrimitiveValue::I4(36)), Some(PrimitiveValue::String("Ada".to_string())))]
    );

    // A call result is never an assignment target.
    let err = f
        .machine
        .set_value_by_expression(&*f.thread, FrameLevel(0), EvalFlags::NONE, "person.Greet(\"Ada\")", "1")
        .unwrap_err();
    assert!(matches!(err, DebuggerError::Eval(EvalError::NotEditable(_))));
    assert_eq!(f.runtime.writes(), 0);
    assert_eq!(f.runtime.func_evals(), vec![MethodToken(GREET), MethodToken(GREET)]);
}

#[test]
fn test_void_call_has_no_value()
{
    let f = fixture();
    f.runtime.register_function(&f.app, LOG, |_runtime, _call| Ok(None));
    let mut call = path(&["person", "Log"]);
    call.push(Instruction::Call { arguments: 0 });
    f.compiler.define("person.Log()", call);

    assert_eq!(evaluate(&f, "person.Log()").unwrap(), "Expression has been evaluated and has no value");
}

#[test]
fn test_unknown_method_is_reported()
{
    let f = fixture();
    let mut call = path(&["person", "Greet"]);
    call.push(Instruction::Call { arguments: 0 });
    f.compiler.define("person.Greet()", call);

    let err = evaluate(&f, "person.Greet()").unwrap_err();
    assert!(matches!(err, DebuggerError::Eval(EvalError::MethodNotFound { ref name, arguments: 0 }) if name == "Greet"));
    assert!(f.runtime.func_evals().is_empty());
}

#[test]
fn test_binary_operands_are_read_left_to_right()
{
    let f = fixture();
    f.runtime
        .register_function(&f.app, GET_NAME, |runtime, _call| Ok(Some(runtime.value(ValueSpec::primitive(PrimitiveValue::I4(1))))));
    f.runtime
        .register_function(&f.app, GET_BROKEN, |runtime, _call| Ok(Some(runtime.value(ValueSpec::primitive(PrimitiveValue::I4(2))))));
    let mut program = path(&["person", "Name"]);
    program.extend(path(&["person", "Broken"]));
    program.push(Instruction::Binary(BinaryOp::Add));
    f.compiler.define("person.Name + person.Broken", program);

    assert_eq!(evaluate(&f, "person.Name + person.Broken").unwrap(), "3");
    assert_eq!(f.runtime.func_evals(), vec![MethodToken(GET_NAME), MethodToken(GET_BROKEN)]);
}

#[test]
fn test_integer_division_by_zero_and_overflow()
{
    let f = fixture();
    f.compiler.define(
        "x / 0",
        [
            Instruction::Identifier("x".to_string()),
            Instruction::Literal(PrimitiveValue::I4(0)),
            Instruction::Binary(BinaryOp::Divide),
        ],
    );
    f.compiler.define(
        "2147483647 + x",
        [
            Instruction::Literal(PrimitiveValue::I4(i32::MAX)),
            Instruction::Identifier("x".to_string()),
            Instruction::Binary(BinaryOp::Add),
        ],
    );

    let err = evaluate(&f, "x / 0").unwrap_err();
    assert!(matches!(err, DebuggerError::Eval(EvalError::Operator(ref text)) if text.contains("divide by zero")));
    let err = evaluate(&f, "2147483647 + x").unwrap_err();
    assert!(matches!(err, DebuggerError::Eval(EvalError::Overflow)));
}
