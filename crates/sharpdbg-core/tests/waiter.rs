//! Tests for function evaluation serialization and cancellation

use std::sync::Arc;
use std::time::Duration;

use sharpdbg_core::breakpoints::LineBreakpointRequest;
use sharpdbg_core::eval::Instruction;
use sharpdbg_core::runtime::mock::{ClassSpec, FrameSpec, MockCompiler, MockModule, MockRuntime, MockSymbols, MockThread, ValueSpec};
use sharpdbg_core::symbols::{MethodRange, SequencePoint};
use sharpdbg_core::types::{EvalFlags, FrameLevel, MethodToken};
use sharpdbg_core::{Breakpoints, DebuggerError, DebuggerOptions, EvalStackMachine, EvalWaiter, HitOutcome};

const FILE: &str = "/src/App/Program.cs";
const MAIN: u32 = 0x0600_0001;
const GET_NAME: u32 = 0x0600_0010;

struct Session
{
    runtime: Arc<MockRuntime>,
    breakpoints: Breakpoints,
    waiter: Arc<EvalWaiter>,
    app: Arc<MockModule>,
    thread: Arc<MockThread>,
}

/// `App.Program.Main` stopped at IL 4 with a local `person` whose `Name`
/// getter answers "Ada".
fn session() -> Session
{
    let runtime = Arc::new(MockRuntime::new());
    let symbols = Arc::new(MockSymbols::new());
    let compiler = Arc::new(MockCompiler::new());
    let waiter = Arc::new(EvalWaiter::new());
    runtime.attach_waiter(&waiter);
    let machine = Arc::new(EvalStackMachine::new(runtime.clone(), symbols.clone(), compiler.clone(), Arc::clone(&waiter)));
    let breakpoints = Breakpoints::new(runtime.clone(), symbols.clone(), machine, &DebuggerOptions::default());

    let core = runtime.load_core_library();
    assert!(breakpoints.on_module_loaded(&*runtime.module_handle(&core)).is_ok());

    let app = runtime.load_module("App.dll");
    symbols.set_range(
        "App.dll",
        FILE,
        MethodRange {
            method: MethodToken(MAIN),
            start_line: 10,
            end_line: 20,
            sequence_points: vec![SequencePoint {
                start_line: 12,
                end_line: 12,
                il_offset: 4,
            }],
        },
    );
    symbols.set_locals("App.dll", MAIN, &[(0, "person", 0, 100)]);
    assert!(breakpoints.on_module_loaded(&*runtime.module_handle(&app)).is_ok());

    let program = runtime.define_class(&app, ClassSpec::new("App.Program"));
    let person_class = runtime.define_class(&app, ClassSpec::new("App.Person").property("Name", Some(GET_NAME), None));
    runtime.register_function(&app, GET_NAME, |runtime, _call| Ok(Some(runtime.value(ValueSpec::string("Ada")))));
    let person = runtime.object(&person_class, &[]);

    let thread = runtime.add_thread(1);
    runtime.push_frame(&thread, FrameSpec::new(&app, &program, MAIN).il_offset(4).local(&person));
    compiler.define(
        "person.Name",
        [
            Instruction::Identifier("person".to_string()),
            Instruction::MemberAccess("Name".to_string()),
        ],
    );

    Session {
        runtime,
        breakpoints,
        waiter,
        app,
        thread,
    }
}

fn wait_until(condition: impl Fn() -> bool)
{
    for _ in 0..1000 {
        if condition() {
            return;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    panic!("condition not reached");
}

fn evaluate_name(s: &Session) -> sharpdbg_core::Result<String>
{
    s.breakpoints
        .evaluator()
        .evaluate_expression(&*s.thread, FrameLevel(0), EvalFlags::NONE, "person.Name")
        .map(|result| result.display)
}

#[test]
fn test_held_completion_is_delivered()
{
    let s = session();
    s.runtime.hold_completions();

    std::thread::scope(|scope| {
        let evaluation = scope.spawn(|| evaluate_name(&s));
        wait_until(|| s.runtime.has_held_completion());
        assert!(s.waiter.is_evaluating());
        s.runtime.release_completions();
        assert_eq!(evaluation.join().unwrap().unwrap(), "\"Ada\"");
    });
    assert!(!s.waiter.is_evaluating());
}

#[test]
fn test_cancel_aborts_running_getter()
{
    let s = session();
    s.runtime.hold_completions();

    std::thread::scope(|scope| {
        let evaluation = scope.spawn(|| evaluate_name(&s));
        wait_until(|| s.runtime.has_held_completion());
        assert!(s.waiter.cancel());
        let result = evaluation.join().unwrap();
        assert!(matches!(result, Err(DebuggerError::Cancelled)));
    });
    assert_eq!(s.runtime.aborts(), 1);

    // The late completion of the aborted call finds nobody waiting.
    s.runtime.release_completions();
    assert!(!s.waiter.is_evaluating());

    // A new evaluation starts a fresh chain.
    assert_eq!(evaluate_name(&s).unwrap(), "\"Ada\"");
}

#[test]
fn test_breakpoint_hit_during_evaluation_is_ignored()
{
    let s = session();
    let set = s.breakpoints.set_line_breakpoints(FILE, &[LineBreakpointRequest::new(12)]).unwrap();
    assert!(set[0].verified);
    let native = s.runtime.active_breakpoint_at(s.app.id(), MAIN, 4).expect("active breakpoint");
    s.runtime.hold_completions();

    std::thread::scope(|scope| {
        let evaluation = scope.spawn(|| evaluate_name(&s));
        wait_until(|| s.runtime.has_held_completion());

        let outcome = s.breakpoints.on_breakpoint_hit(&*s.thread, &*native).unwrap();
        assert!(matches!(outcome, HitOutcome::NoStop));

        s.runtime.release_completions();
        assert!(evaluation.join().unwrap().is_ok());
    });

    assert_eq!(s.breakpoints.breakpoints()[0].hit_count, 0);
    let outcome = s.breakpoints.on_breakpoint_hit(&*s.thread, &*native).unwrap();
    assert!(matches!(outcome, HitOutcome::Breakpoint(ref bp) if bp.id == set[0].id && bp.hit_count == 1));
}

#[test]
fn test_shutdown_fails_later_evaluations()
{
    let s = session();
    s.waiter.shutdown();
    assert!(matches!(evaluate_name(&s), Err(DebuggerError::Cancelled)));
    assert!(s.runtime.func_evals().is_empty());
}
