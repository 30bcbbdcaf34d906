//! Tests for runtime reference bookkeeping across evaluations

use std::sync::Arc;

use sharpdbg_core::eval::{BinaryOp, Instruction};
use sharpdbg_core::runtime::mock::{ClassSpec, FrameSpec, MockCompiler, MockRuntime, MockSymbols, MockThread, ValueSpec};
use sharpdbg_core::types::{EvalFlags, FrameLevel, PrimitiveValue};
use sharpdbg_core::{DebuggerError, EvalStackMachine, EvalWaiter};

const MAIN: u32 = 0x0600_0001;
const GET_TOTAL: u32 = 0x0600_0020;

struct Fixture
{
    runtime: Arc<MockRuntime>,
    machine: EvalStackMachine,
    thread: Arc<MockThread>,
}

/// `order` is a local `App.Order` with field `Count` and getter `Total`.
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
    let order_class = runtime.define_class(
        &app,
        ClassSpec::new("App.Order").field("Count", 0x0400_0001).property("Total", Some(GET_TOTAL), None),
    );
    runtime.register_function(&app, GET_TOTAL, |runtime, _call| {
        Ok(Some(runtime.value(ValueSpec::primitive(PrimitiveValue::I4(120)))))
    });
    let count = runtime.value(ValueSpec::primitive(PrimitiveValue::I4(3)));
    let order = runtime.object(&order_class, &[("Count", count)]);
    symbols.set_locals("App.dll", MAIN, &[(0, "order", 0, 100)]);

    let thread = runtime.add_thread(1);
    runtime.push_frame(&thread, FrameSpec::new(&app, &program, MAIN).local(&order));

    compiler.define(
        "order.Total / order.Count",
        [
            Instruction::Identifier("order".to_string()),
            Instruction::MemberAccess("Total".to_string()),
            Instruction::Identifier("order".to_string()),
            Instruction::MemberAccess("Count".to_string()),
            Instruction::Binary(BinaryOp::Divide),
        ],
    );

    Fixture {
        runtime,
        machine,
        thread,
    }
}

#[test]
fn test_evaluation_releases_intermediate_values()
{
    let f = fixture();
    let baseline = f.runtime.outstanding_refs();

    let result = f
        .machine
        .evaluate_expression(&*f.thread, FrameLevel(0), EvalFlags::NONE, "order.Total / order.Count")
        .unwrap();
    assert_eq!(result.display, "40");
    // Only the result itself is still held.
    assert_eq!(f.runtime.outstanding_refs(), baseline + 1);

    drop(result);
    assert_eq!(f.runtime.outstanding_refs(), baseline);
    assert!(!f.runtime.over_released());
}

#[test]
fn test_failed_runtime_call_releases_acquired_handles()
{
    let f = fixture();
    let baseline = f.runtime.outstanding_refs();
    f.runtime.fail_on("GetFieldValue");

    let err = f
        .machine
        .evaluate_expression(&*f.thread, FrameLevel(0), EvalFlags::NONE, "order.Total / order.Count")
        .unwrap_err();
    assert!(matches!(err, DebuggerError::Runtime { call: "GetFieldValue", .. }));
    assert_eq!(f.runtime.outstanding_refs(), baseline);
    assert!(!f.runtime.over_released());

    f.runtime.clear_faults();
    assert!(f
        .machine
        .evaluate_expression(&*f.thread, FrameLevel(0), EvalFlags::NONE, "order.Total / order.Count")
        .is_ok());
}

#[test]
fn test_failed_getter_call_releases_acquired_handles()
{
    let f = fixture();
    let baseline = f.runtime.outstanding_refs();
    f.runtime.fail_on("CallFunction");

    let err = f
        .machine
        .evaluate_expression(&*f.thread, FrameLevel(0), EvalFlags::NONE, "order.Total / order.Count")
        .unwrap_err();
    assert!(matches!(err, DebuggerError::Runtime { call: "CallFunction", .. }));
    assert_eq!(f.runtime.outstanding_refs(), baseline);
    assert!(f.runtime.func_evals().is_empty());
}
