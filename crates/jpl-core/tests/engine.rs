use jpl_core::{
    BoxError, Engine, ErrorKind, JVal, JplError, OpFuture, Operator, Operators, Output, Piper,
    Runtime, RuntimeOptions, Scope, Signal, ready,
};
use futures::FutureExt;
use pretty_assertions::assert_eq;
use serde_json::{Map, Value, json};
use std::cell::Cell;
use std::error::Error as _;
use std::io;
use std::rc::Rc;

struct PassThrough;

impl Operator for PassThrough {
    type Params = ();

    fn map(&self, _: &Operators, _: &Map<String, Value>) -> Result<(), JplError> {
        Ok(())
    }

    fn op<'a>(
        &'a self,
        _: &'a Runtime,
        input: JVal,
        _: &'a (),
        scope: Scope,
        next: Piper,
    ) -> OpFuture<'a> {
        ready(Ok(next.pipe(input, scope)))
    }
}

/// Counts its invocations.
struct Counting(Rc<Cell<usize>>);

impl Operator for Counting {
    type Params = ();

    fn map(&self, _: &Operators, _: &Map<String, Value>) -> Result<(), JplError> {
        Ok(())
    }

    fn op<'a>(
        &'a self,
        _: &'a Runtime,
        input: JVal,
        _: &'a (),
        scope: Scope,
        next: Piper,
    ) -> OpFuture<'a> {
        self.0.set(self.0.get() + 1);
        ready(Ok(next.pipe(input, scope)))
    }
}

/// Fails with a foreign error type.
struct DiskFailure;

impl Operator for DiskFailure {
    type Params = ();

    fn map(&self, _: &Operators, _: &Map<String, Value>) -> Result<(), JplError> {
        Ok(())
    }

    fn op<'a>(&'a self, _: &'a Runtime, _: JVal, _: &'a (), _: Scope, _: Piper) -> OpFuture<'a> {
        Box::pin(async { Err::<Output, BoxError>(io::Error::other("disk on fire").into()) })
    }
}

/// Divides 1 by its input.
struct Reciprocal;

impl Operator for Reciprocal {
    type Params = ();

    fn map(&self, _: &Operators, _: &Map<String, Value>) -> Result<(), JplError> {
        Ok(())
    }

    fn op<'a>(
        &'a self,
        _: &'a Runtime,
        input: JVal,
        _: &'a (),
        scope: Scope,
        next: Piper,
    ) -> OpFuture<'a> {
        let result = match input.as_f64() {
            Some(n) if n == 0.0 => {
                Err(JplError::zero_division("cannot divide by zero").with_value(input))
            }
            Some(n) => Ok(next.pipe(JVal::Number(1.0 / n), scope)),
            None => Err(JplError::type_error("expected a number").with_value(input)),
        };
        ready(result)
    }
}

/// Exits the execution's signal, then continues.
struct Exit;

impl Operator for Exit {
    type Params = ();

    fn map(&self, _: &Operators, _: &Map<String, Value>) -> Result<(), JplError> {
        Ok(())
    }

    fn op<'a>(
        &'a self,
        _: &'a Runtime,
        input: JVal,
        _: &'a (),
        scope: Scope,
        next: Piper,
    ) -> OpFuture<'a> {
        scope.signal().exit();
        ready(Ok(next.pipe(input, scope)))
    }
}

fn engine(counter: &Rc<Cell<usize>>) -> Engine {
    let mut engine = Engine::new();
    engine.register("id", PassThrough);
    engine.register("count", Counting(Rc::clone(counter)));
    engine.register("disk", DiskFailure);
    engine.register("1/x", Reciprocal);
    engine.register("exit", Exit);
    engine
}

fn ops(names: &[&str]) -> Value {
    Value::Array(names.iter().map(|op| json!({"op": op})).collect())
}

#[tokio::test]
async fn long_pipelines_do_not_grow_the_stack() {
    let counter = Rc::new(Cell::new(0));
    let engine = engine(&counter);
    let program = engine.load(&ops(&vec!["id"; 100_000])).unwrap();
    let out = engine.run(&program, &[json!({"deep": [1]})]).await.unwrap();
    assert_eq!(out, vec![json!({"deep": [1]})]);
}

#[tokio::test]
async fn long_chains_of_fan_outs_do_not_grow_the_stack() {
    let engine = Engine::new();
    let keep_first = json!({"op": ",", "params": {"pipes": [[], [{"op": "vod"}]]}});
    let keep_last = json!({"op": ",", "params": {"pipes": [[{"op": "vod"}], []]}});
    let forks: Vec<Value> = (0..20_000)
        .map(|i| if i % 2 == 0 { keep_first.clone() } else { keep_last.clone() })
        .collect();
    let program = engine.load(&Value::Array(forks)).unwrap();
    let out = engine.run(&program, &[json!("a"), json!([2])]).await.unwrap();
    assert_eq!(out, vec![json!("a"), json!([2])]);
}

#[tokio::test]
async fn a_lone_unknown_op_is_fatal_for_any_input() {
    let engine = Engine::new();
    let program = engine
        .load(&json!([{"op": "no-such-op", "params": {}}]))
        .unwrap();
    for input in [json!(null), json!({"a": [1]}), json!("s")] {
        let err = engine.run(&program, &[input]).await.unwrap_err();
        assert!(err.is_fatal());
    }
}

#[tokio::test]
async fn unknown_ops_fail_when_reached() {
    let engine = Engine::new();
    let program = engine.load(&ops(&["tru", "nope"])).unwrap();
    let err = engine.run(&program, &[json!(1)]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fatal);
    assert_eq!(err.message(), "invalid OP 'nope'");
    assert!(err.enclosure().is_none());

    let unreached = engine.load(&ops(&["vod", "nope"])).unwrap();
    assert!(engine.run(&unreached, &[json!(1)]).await.unwrap().is_empty());
    assert!(engine.run(&program, &[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn foreign_failures_are_wrapped_with_their_cause() {
    let counter = Rc::new(Cell::new(0));
    let engine = engine(&counter);
    let program = engine.load(&ops(&["id", "disk"])).unwrap();
    let err = engine.run(&program, &[json!(1)]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Execution);
    assert_eq!(err.to_string(), "ExecutionError: disk on fire");
    let cause = err.source().unwrap();
    assert!(cause.downcast_ref::<io::Error>().is_some());
    let at = err.enclosure().unwrap();
    assert_eq!((at.op.as_str(), at.step), ("disk", 1));
}

#[tokio::test]
async fn runtime_errors_keep_their_kind() {
    let counter = Rc::new(Cell::new(0));
    let engine = engine(&counter);
    let program = engine.load(&ops(&["1/x"])).unwrap();
    assert_eq!(engine.run(&program, &[json!(4)]).await.unwrap(), vec![json!(0.25)]);

    let err = engine.run(&program, &[json!(2), json!(0)]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ZeroDivision);
    assert!(err.kind().is_runtime());
    assert_eq!(err.value(), Some(&JVal::Number(0.0)));

    let err = engine.run(&program, &[json!("x")]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
}

#[tokio::test]
async fn exiting_the_signal_stops_at_the_next_step() {
    let counter = Rc::new(Cell::new(0));
    let engine = engine(&counter);
    let program = engine.load(&ops(&["count", "exit", "count", "count"])).unwrap();
    let err = engine.run(&program, &[json!(1)]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fatal);
    assert_eq!(err.message(), "execution has been exited");
    assert_eq!(counter.get(), 1);
}

#[tokio::test]
async fn host_can_cancel_a_running_execution() {
    let counter = Rc::new(Cell::new(0));
    let engine = engine(&counter);
    let program = engine.load(&ops(&vec!["count"; 1_000])).unwrap();
    let runtime = engine.runtime(program, RuntimeOptions::default());
    let signal = Signal::new();

    let host = async {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        signal.exit();
    };
    let (result, ()) = futures::join!(runtime.execute_with(vec![JVal::Null], signal.clone()), host);
    let err = result.unwrap_err();
    assert!(err.is_fatal());
    assert!(counter.get() < 1_000);
}

#[tokio::test]
async fn signal_is_exited_on_every_way_out() {
    let counter = Rc::new(Cell::new(0));
    let engine = engine(&counter);
    let failing = engine.runtime(engine.load(&ops(&["disk"])).unwrap(), RuntimeOptions::default());
    let signal = Signal::new();
    assert!(failing.execute_with(vec![JVal::Null], signal.clone()).await.is_err());
    assert!(signal.is_exited());

    let program = engine.load(&ops(&vec!["id"; 10])).unwrap();
    let pending = engine.runtime(program, RuntimeOptions::default());
    let signal = Signal::new();
    let first_poll = pending
        .execute_with(vec![JVal::Null], signal.clone())
        .now_or_never();
    assert!(first_poll.is_none());
    assert!(signal.is_exited());
}

#[tokio::test]
async fn a_failing_branch_drops_its_siblings() {
    let counter = Rc::new(Cell::new(0));
    let engine = engine(&counter);
    let program = engine
        .load(&json!([{"op": ",", "params": {"pipes": [
            [{"op": "disk"}],
            [{"op": "id"}, {"op": "count"}, {"op": "count"}, {"op": "count"}]
        ]}}]))
        .unwrap();
    let err = engine.run(&program, &[json!(1)]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Execution);
    assert!(counter.get() < 3);
}

#[tokio::test]
async fn outputs_keep_emission_order_across_branches() {
    let counter = Rc::new(Cell::new(0));
    let engine = engine(&counter);
    let slow: Vec<Value> = (0..50).map(|_| json!({"op": "id"})).collect();
    let program = engine
        .load(&json!([{"op": ",", "params": {"pipes": [
            slow,
            [{"op": "nbr", "params": {"number": 2}}]
        ]}}]))
        .unwrap();
    let out = engine.run(&program, &[json!(1), json!(3)]).await.unwrap();
    assert_eq!(out, vec![json!(1), json!(2), json!(3), json!(2)]);
}

#[test]
fn malformed_programs_are_syntax_errors() {
    let engine = Engine::new();
    let err = engine.load(&json!({"instructions": 5})).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Syntax);
    assert!(!err.kind().is_runtime());
}
