//! Operator contract, operator registry and the execution engine.
//!
//! The engine walks a compiled [`Pipe`] in continuation-passing style. Each
//! step yields to the scheduler, checks the execution's [`Signal`] and hands
//! the current value to the instruction's operator together with a
//! continuation for the rest of the pipe. Operators answer with an
//! [`Output`]; [`Runtime::resolve`] drives every pending continuation from one
//! flat loop, running branches concurrently.

use crate::apply::{ObjectChange, apply_object};
use crate::compare;
use crate::error::{BoxError, JplError, adapt_error, adapt_errors_async};
use crate::flow::{Frame, Item, Kind, Output, Pending, Piper};
use crate::jval::{Closure, Function, JVal, JplType, Object};
use crate::mux::mux_async;
use crate::program::{Pipe, Program, compile_pipe};
use crate::scope::{Scope, Signal};
use futures::future::{self, FutureExt, LocalBoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::Any;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::iter;
use std::mem;
use std::rc::Rc;

pub type OpFuture<'a> = LocalBoxFuture<'a, Result<Output, BoxError>>;

/// A pluggable pipeline instruction.
///
/// `map` runs once per instruction when a program is compiled and turns the
/// raw JSON params into `Params`. `op` runs once per (instruction, input)
/// pair; it may pipe zero, one or many values into `next`, each with its own
/// scope, and may run sub-pipelines through the [`Runtime`].
///
/// Failures of any error type may be raised. [`JplError`]s keep their kind,
/// everything else is reported as an `ExecutionError`.
pub trait Operator: 'static {
    type Params: 'static;

    fn map(&self, operators: &Operators, params: &Map<String, Value>)
    -> Result<Self::Params, JplError>;

    fn op<'a>(
        &'a self,
        runtime: &'a Runtime,
        input: JVal,
        params: &'a Self::Params,
        scope: Scope,
        next: Piper,
    ) -> OpFuture<'a>;
}

/// Wrap an already computed operator result.
pub fn ready<'a>(result: Result<Output, JplError>) -> OpFuture<'a> {
    future::ready(result.map_err(BoxError::from)).boxed_local()
}

pub(crate) trait ErasedOperator {
    fn map_erased(
        &self,
        operators: &Operators,
        params: &Map<String, Value>,
    ) -> Result<Rc<dyn Any>, JplError>;

    fn op_erased<'a>(
        &'a self,
        runtime: &'a Runtime,
        input: JVal,
        params: &'a dyn Any,
        scope: Scope,
        next: Piper,
    ) -> OpFuture<'a>;
}

impl<O: Operator> ErasedOperator for O {
    fn map_erased(
        &self,
        operators: &Operators,
        params: &Map<String, Value>,
    ) -> Result<Rc<dyn Any>, JplError> {
        let params: Rc<dyn Any> = Rc::new(self.map(operators, params)?);
        Ok(params)
    }

    fn op_erased<'a>(
        &'a self,
        runtime: &'a Runtime,
        input: JVal,
        params: &'a dyn Any,
        scope: Scope,
        next: Piper,
    ) -> OpFuture<'a> {
        match params.downcast_ref::<O::Params>() {
            Some(params) => self.op(runtime, input, params, scope, next),
            None => ready(Err(JplError::fatal(
                "compiled params do not belong to this operator",
            ))),
        }
    }
}

/// Operator registry, keyed by op name.
///
/// Registries are instance-local; different engines can carry different
/// operator sets.
#[derive(Clone)]
pub struct Operators {
    ops: HashMap<String, Rc<dyn ErasedOperator>>,
}

impl Operators {
    /// Registry preloaded with the built-in operators.
    pub fn new() -> Self {
        let mut operators = Self::empty();
        crate::ops::register_builtins(&mut operators);
        operators
    }

    pub fn empty() -> Self {
        Self {
            ops: HashMap::new(),
        }
    }

    /// Register or replace an operator. Returns `true` when a previous
    /// operator of that name was replaced.
    pub fn register<O: Operator>(&mut self, name: impl Into<String>, operator: O) -> bool {
        self.ops.insert(name.into(), Rc::new(operator)).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Rc<dyn ErasedOperator>> {
        self.ops.get(name)
    }

    /// Registered op names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.ops.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Compile a nested pipe found in operator params.
    pub fn compile(&self, raw: &Value) -> Result<Pipe, JplError> {
        compile_pipe(self, raw)
    }
}

impl Default for Operators {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Operators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

/// Per-runtime options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeOptions {
    /// Variables bound in the root scope of every execution.
    #[serde(default)]
    pub vars: Map<String, Value>,
}

impl RuntimeOptions {
    /// Layer these options over `defaults`; entries set here win.
    pub fn with_defaults(self, defaults: &RuntimeOptions) -> Self {
        let mut vars = defaults.vars.clone();
        vars.extend(self.vars);
        Self { vars }
    }
}

/// Exits the execution's signal and releases its scope tree on every way out
/// of an execution, including the future being dropped.
struct ExitGuard(Scope);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.signal().exit();
        self.0.teardown();
    }
}

/// A compiled program bound to its operators and options.
pub struct Runtime {
    program: Program,
    operators: Rc<Operators>,
    options: RuntimeOptions,
}

impl Runtime {
    pub fn new(program: Program, operators: Rc<Operators>, options: RuntimeOptions) -> Self {
        Self {
            program,
            operators,
            options,
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn operators(&self) -> &Operators {
        &self.operators
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// Run the program once per input and collect every final value.
    pub async fn execute<I>(&self, inputs: I) -> Result<Vec<JVal>, JplError>
    where
        I: IntoIterator,
        I::Item: Into<JVal>,
    {
        let inputs = inputs.into_iter().map(Into::into).collect();
        self.execute_with(inputs, Signal::new()).await
    }

    /// Like [`Runtime::execute`], observing a host-provided signal. The signal
    /// is exited once the execution ends, whatever the outcome.
    #[tracing::instrument(level = "debug", skip_all, fields(inputs = inputs.len()))]
    pub async fn execute_with(
        &self,
        inputs: Vec<JVal>,
        signal: Signal,
    ) -> Result<Vec<JVal>, JplError> {
        let vars = self
            .options
            .vars
            .iter()
            .map(|(name, value)| (name.clone(), self.normalize_value(value)))
            .collect();
        let scope = self.create_scope(vars, signal);
        let _guard = ExitGuard(scope.clone());
        tracing::debug!(instructions = self.program.pipe().len(), "execution started");

        let output = self.execute_instructions(self.program.pipe(), inputs, scope, Piper::emit());
        match self.resolve(output).await {
            Ok(values) => {
                tracing::debug!(outputs = values.len(), "execution finished");
                Ok(values)
            }
            Err(err) if err.is_fatal() => {
                tracing::warn!(error = %err, "execution aborted");
                Err(err)
            }
            Err(err) => {
                tracing::debug!(error = %err, "execution failed");
                Err(err)
            }
        }
    }

    pub fn create_scope(&self, vars: Object, signal: Signal) -> Scope {
        Scope::new(vars, signal)
    }

    /// Schedule `pipe` once per input. Values reaching the end of the pipe
    /// continue into `next`.
    pub fn execute_instructions(
        &self,
        pipe: &Pipe,
        inputs: Vec<JVal>,
        scope: Scope,
        next: Piper,
    ) -> Output {
        let entry = Piper::step(Rc::new(Frame::new(pipe.clone(), next)), 0);
        inputs
            .into_iter()
            .map(|input| entry.pipe(input, scope.clone()))
            .collect()
    }

    /// Run `pipe` on a single input and collect its results.
    pub async fn execute_pipe(
        &self,
        pipe: &Pipe,
        input: JVal,
        scope: Scope,
    ) -> Result<Vec<JVal>, JplError> {
        let output = self.execute_instructions(pipe, vec![input], scope, Piper::emit());
        self.resolve(output).await
    }

    /// Drive `output` until only final values remain.
    ///
    /// Every pending continuation runs as a branch of one flat driver loop,
    /// however often branches fan out again, so the native stack only grows
    /// with sub-pipelines run from inside operators. Results keep emission
    /// order. The first failure drops every sibling branch.
    pub async fn resolve(&self, output: Output) -> Result<Vec<JVal>, JplError> {
        let mut slots = vec![Slot::Running];
        let mut running = FuturesUnordered::new();
        self.schedule(0, output, &mut slots, &mut running);
        while let Some((slot, result)) = running.next().await {
            self.schedule(slot, result?, &mut slots, &mut running);
        }
        Ok(collect_slots(slots))
    }

    /// Record `output` as the results of `slot` and start its pending
    /// continuations. A lone continuation keeps running in the same slot.
    fn schedule<'a>(
        &'a self,
        slot: usize,
        output: Output,
        slots: &mut Vec<Slot>,
        running: &mut FuturesUnordered<Branch<'a>>,
    ) {
        let items = match output.into_tail() {
            Ok(pending) => {
                running.push(self.branch(slot, pending));
                return;
            }
            Err(output) => output.into_items(),
        };
        let mut children = Vec::with_capacity(items.len());
        for item in items {
            let child = slots.len();
            match item {
                Item::Value(value) => slots.push(Slot::Value(value)),
                Item::Pending(pending) => {
                    slots.push(Slot::Running);
                    running.push(self.branch(child, pending));
                }
            }
            children.push(child);
        }
        slots[slot] = Slot::Split(children);
    }

    fn branch(&self, slot: usize, pending: Pending) -> Branch<'_> {
        self.advance(pending)
            .map(move |result| (slot, result))
            .boxed_local()
    }

    async fn advance(&self, pending: Pending) -> Result<Output, JplError> {
        let Pending {
            piper,
            value,
            scope,
        } = pending;
        match piper.0 {
            Kind::Emit => Ok(Output::value(value)),
            Kind::Step(frame, index) => self.step(frame, index, value, scope).await,
            Kind::Func(callback) => (*callback)(value, scope),
        }
    }

    async fn step(
        &self,
        frame: Rc<Frame>,
        index: usize,
        input: JVal,
        scope: Scope,
    ) -> Result<Output, JplError> {
        tokio::task::yield_now().await;
        scope.signal().check_health()?;

        let Some(instruction) = frame.pipe.get(index) else {
            return Ok(frame.next.pipe(input, scope));
        };
        let Some(operator) = instruction.operator() else {
            return Err(JplError::fatal(format!("invalid OP '{}'", instruction.op())));
        };
        tracing::trace!(op = instruction.op(), step = index, "dispatch");

        let next = Piper::step(Rc::clone(&frame), index + 1);
        operator
            .op_erased(self, input, instruction.params(), scope, next)
            .await
            .map_err(|err| adapt_error(err).enclose(instruction.op(), index))
    }

    /// Invoke a registered operator outside of any program, once per input.
    pub async fn op(
        &self,
        name: &str,
        params: &Map<String, Value>,
        inputs: Vec<JVal>,
        scope: Scope,
        next: Piper,
    ) -> Result<Output, JplError> {
        let Some(operator) = self.operators.get(name) else {
            return Err(JplError::fatal(format!("invalid OP '{name}'")));
        };
        let params = operator
            .map_erased(&self.operators, params)
            .map_err(|err| err.enclose(name, 0))?;
        let outputs = mux_async(&[inputs], |args| {
            let input = args.into_iter().next().unwrap_or(JVal::Null);
            let (params, scope, next) = (&params, scope.clone(), next.clone());
            async move {
                operator
                    .op_erased(self, input, &**params, scope, next)
                    .await
                    .map_err(|err| adapt_error(err).enclose(name, 0))
            }
        })
        .await?;
        Ok(outputs.into_iter().collect())
    }

    /// Schedule a call of `func` with `input` as its pipe input.
    ///
    /// Declared parameters bind to `args` in order, missing ones to `null`.
    /// Results continue into `next` in the caller's `scope`. Native functions
    /// run right away and may fail.
    pub fn call_function(
        &self,
        func: &Function,
        input: JVal,
        args: Vec<JVal>,
        scope: &Scope,
        next: Piper,
    ) -> Result<Output, JplError> {
        let call_scope = match func.closure() {
            Closure::Native(native) => return (**native)(self, input, args, scope, next),
            Closure::Scoped(closure) => closure.child(bind_arguments(func.params(), args)),
            Closure::Orphan(presets) => Scope::new(presets.clone(), scope.signal().clone())
                .child(bind_arguments(func.params(), args)),
        };
        let caller = scope.clone();
        let resume = Piper::func(move |value, _| Ok(next.pipe(value, caller.clone())));
        Ok(self.execute_instructions(func.body(), vec![input], call_scope, resume))
    }

    /// Deep merge: when both sides are objects, `b`'s entries are merged into
    /// `a` key by key (absent keys start from `null`); otherwise `b` wins.
    ///
    /// Nested objects are walked with an explicit stack of open levels, so
    /// document depth never grows the native stack.
    pub async fn merge(&self, a: JVal, b: JVal) -> JVal {
        let (target, source) = match (&a, &b) {
            (JVal::Object(target), JVal::Object(source)) => (Rc::clone(target), Rc::clone(source)),
            _ => return b,
        };
        let mut root = MergeLevel::new(target, source);
        let mut nested: Vec<(String, MergeLevel)> = Vec::new();
        loop {
            let level = match nested.last_mut() {
                Some((_, level)) => level,
                None => &mut root,
            };
            if let Some((key, current, value)) = level.next_entry() {
                match (current, value) {
                    (JVal::Object(target), JVal::Object(source)) => {
                        nested.push((key, MergeLevel::new(target, source)));
                        tokio::task::yield_now().await;
                    }
                    (_, value) => level.changes.push(ObjectChange::Set(key, value)),
                }
                continue;
            }
            let Some((key, done)) = nested.pop() else {
                return root.finish();
            };
            let merged = done.finish();
            let parent = match nested.last_mut() {
                Some((_, level)) => level,
                None => &mut root,
            };
            parent.changes.push(ObjectChange::Set(key, merged));
        }
    }

    /// Derive a new value from `value`. Updater failures are classified the
    /// same way operator failures are.
    pub async fn alter_value<F, Fut, E>(&self, value: JVal, updater: F) -> Result<JVal, JplError>
    where
        F: FnOnce(JVal) -> Fut,
        Fut: Future<Output = Result<JVal, E>>,
        E: Into<BoxError>,
    {
        adapt_errors_async(updater(value)).await
    }

    pub fn normalize_value(&self, value: &Value) -> JVal {
        JVal::from(value)
    }

    /// Normalize a JSON array into its items.
    pub fn normalize_values(&self, values: &Value, name: &str) -> Result<Vec<JVal>, JplError> {
        match values {
            Value::Array(items) => Ok(items.iter().map(JVal::from).collect()),
            _ => Err(JplError::fatal(format!("expected {name} to be an array"))),
        }
    }

    pub fn strip_value(&self, value: &JVal) -> Result<Value, JplError> {
        value.strip()
    }

    pub fn strip_values(&self, values: &[JVal]) -> Result<Vec<Value>, JplError> {
        values.iter().map(JVal::strip).collect()
    }

    pub fn stringify_json(&self, value: &JVal, unescape_string: bool) -> Result<String, JplError> {
        value.stringify(unescape_string)
    }

    pub fn type_of(&self, value: &JVal) -> JplType {
        value.type_of()
    }

    pub fn assert_type(&self, value: &JVal, expected: JplType) -> Result<(), JplError> {
        let actual = value.type_of();
        if actual != expected {
            return Err(JplError::type_error(format!(
                "unexpected {actual}, expected {expected}"
            ))
            .with_value(value.clone()));
        }
        Ok(())
    }

    pub fn truthy(&self, value: &JVal) -> bool {
        value.is_truthy()
    }

    pub fn compare(&self, a: &JVal, b: &JVal) -> Ordering {
        compare::compare(a, b)
    }

    pub fn equals(&self, a: &JVal, b: &JVal) -> bool {
        compare::equals(a, b)
    }
}

type Branch<'a> = LocalBoxFuture<'a, (usize, Result<Output, JplError>)>;

/// Place of a branch's results in emission order.
enum Slot {
    Value(JVal),
    Running,
    Split(Vec<usize>),
}

/// Flatten the slot tree rooted at slot 0 into emission order.
fn collect_slots(mut slots: Vec<Slot>) -> Vec<JVal> {
    let mut values = Vec::new();
    let mut stack = vec![0];
    while let Some(index) = stack.pop() {
        match mem::replace(&mut slots[index], Slot::Running) {
            Slot::Value(value) => values.push(value),
            Slot::Split(children) => stack.extend(children.into_iter().rev()),
            Slot::Running => {}
        }
    }
    values
}

fn bind_arguments(params: &[String], args: Vec<JVal>) -> Vec<(String, JVal)> {
    params
        .iter()
        .cloned()
        .zip(args.into_iter().chain(iter::repeat(JVal::Null)))
        .collect()
}

/// One object level of a deep merge in progress.
struct MergeLevel {
    target: Rc<Object>,
    source: Rc<Object>,
    next: usize,
    changes: Vec<ObjectChange>,
}

impl MergeLevel {
    fn new(target: Rc<Object>, source: Rc<Object>) -> Self {
        Self {
            target,
            source,
            next: 0,
            changes: Vec::new(),
        }
    }

    /// Next source entry along with the target value it lands on.
    fn next_entry(&mut self) -> Option<(String, JVal, JVal)> {
        let (key, value) = self.source.get_index(self.next)?;
        self.next += 1;
        let current = self.target.get(key).cloned().unwrap_or(JVal::Null);
        Some((key.clone(), current, value.clone()))
    }

    fn finish(self) -> JVal {
        JVal::Object(apply_object(&self.target, self.changes))
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("pipe", self.program.pipe())
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::program::{compile_program, parse_program};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io;

    fn runtime_with(doc: Value, options: RuntimeOptions) -> Runtime {
        let operators = Rc::new(Operators::new());
        let program = compile_program(parse_program(&doc).unwrap(), &operators).unwrap();
        Runtime::new(program, operators, options)
    }

    fn runtime(doc: Value) -> Runtime {
        runtime_with(doc, RuntimeOptions::default())
    }

    fn json_of(values: &[JVal]) -> Value {
        Value::Array(values.iter().map(|v| v.strip().unwrap()).collect())
    }

    #[tokio::test]
    async fn runs_once_per_input() {
        let rt = runtime(json!([{"op": ",", "params": {"pipes": [[], [{"op": "tru"}]]}}]));
        let out = rt.execute([json!(1), json!("a")]).await.unwrap();
        assert_eq!(json_of(&out), json!([1, true, "a", true]));
        assert!(rt.execute(Vec::<Value>::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn preset_vars_are_visible() {
        let options: RuntimeOptions = serde_json::from_value(json!({"vars": {"x": 1}})).unwrap();
        let defaults: RuntimeOptions =
            serde_json::from_value(json!({"vars": {"x": 0, "y": [2]}})).unwrap();
        let options = options.with_defaults(&defaults);
        assert_eq!(Value::Object(options.vars.clone()), json!({"x": 1, "y": [2]}));

        let rt = runtime_with(
            json!([{"op": ",", "params": {"pipes": [
                [{"op": "var", "params": {"name": "x"}}],
                [{"op": "var", "params": {"name": "y"}}]
            ]}}]),
            options,
        );
        let out = rt.execute([Value::Null]).await.unwrap();
        assert_eq!(json_of(&out), json!([1, [2]]));
    }

    #[tokio::test]
    async fn signal_is_exited_afterwards() {
        let rt = runtime(json!([{"op": "tru"}]));
        let signal = Signal::new();
        rt.execute_with(vec![JVal::Null], signal.clone()).await.unwrap();
        assert!(signal.is_exited());

        let err = rt.execute_with(vec![JVal::Null], signal).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }

    #[tokio::test]
    async fn ad_hoc_op_runs_per_input() {
        let rt = runtime(json!([]));
        let scope = rt.create_scope(Object::new(), Signal::new());
        let params = json!({"number": 7});
        let output = rt
            .op(
                "nbr",
                params.as_object().unwrap(),
                vec![JVal::Null, JVal::Null],
                scope.clone(),
                Piper::emit(),
            )
            .await
            .unwrap();
        assert_eq!(json_of(&rt.resolve(output).await.unwrap()), json!([7, 7]));

        let err = rt
            .op("nope", &Map::new(), vec![JVal::Null], scope, Piper::emit())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "invalid OP 'nope'");
    }

    #[tokio::test]
    async fn functions_bind_arguments_and_return_to_the_caller() {
        let rt = runtime(json!([]));
        let operators = Operators::new();
        let body = operators
            .compile(&json!([{"op": ",", "params": {"pipes": [
                [{"op": "var", "params": {"name": "a"}}],
                [{"op": "var", "params": {"name": "b"}}],
                [{"op": "var", "params": {"name": "preset"}}]
            ]}}]))
            .unwrap();
        let mut presets = Object::new();
        presets.insert("preset".into(), JVal::from("p"));
        let func = Function::orphan(vec!["a".into(), "b".into()], body, presets);

        let caller = rt.create_scope(Object::new(), Signal::new());
        let output = rt
            .call_function(&func, JVal::Null, vec![JVal::Number(1.0)], &caller, Piper::emit())
            .unwrap();
        assert_eq!(json_of(&rt.resolve(output).await.unwrap()), json!([1, null, "p"]));
    }

    #[tokio::test]
    async fn native_functions_receive_the_call_as_is() {
        let rt = runtime(json!([]));
        let func = Function::native(|_, input, args, scope, next| {
            Ok(iter::once(input)
                .chain(args)
                .map(|value| next.pipe(value, scope.clone()))
                .collect())
        });
        let caller = rt.create_scope(Object::new(), Signal::new());
        let args = vec![JVal::Number(1.0), JVal::Bool(true)];
        let output = rt
            .call_function(&func, JVal::from("in"), args, &caller, Piper::emit())
            .unwrap();
        assert_eq!(json_of(&rt.resolve(output).await.unwrap()), json!(["in", 1, true]));

        let failing = Function::native(|_, input, _, _, _| {
            Err(JplError::type_error("nope").with_value(input))
        });
        let err = rt
            .call_function(&failing, JVal::Null, Vec::new(), &caller, Piper::emit())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
        assert_eq!(format!("{:?}", failing.closure()), "Native");
    }

    #[tokio::test]
    async fn merge_is_deep_and_leaves_inputs_alone() {
        let rt = runtime(json!([]));
        let a = JVal::from(json!({"a": {"x": 1}, "keep": true}));
        let b = JVal::from(json!({"a": {"y": 2}, "n": [1]}));
        let merged = rt.merge(a.clone(), b).await;
        assert_eq!(
            merged.strip().unwrap(),
            json!({"a": {"x": 1, "y": 2}, "keep": true, "n": [1]})
        );
        assert_eq!(a.strip().unwrap(), json!({"a": {"x": 1}, "keep": true}));

        let replaced = rt.merge(a, JVal::from(json!([1]))).await;
        assert_eq!(replaced.strip().unwrap(), json!([1]));

        let nested = rt
            .merge(JVal::from(json!({"a": 1})), JVal::from(json!({"a": [1, 2]})))
            .await;
        assert_eq!(nested.strip().unwrap(), json!({"a": [1, 2]}));
    }

    fn nest(depth: usize, leaf: JVal) -> JVal {
        (0..depth).fold(leaf, |inner, _| {
            let mut entries = Object::new();
            entries.insert("a".into(), inner);
            JVal::from(entries)
        })
    }

    /// Drops a nested value level by level.
    fn release(value: JVal) {
        let mut pending = vec![value];
        while let Some(value) = pending.pop() {
            if let JVal::Object(entries) = value {
                if let Ok(entries) = Rc::try_unwrap(entries) {
                    pending.extend(entries.into_values());
                }
            }
        }
    }

    #[tokio::test]
    async fn merge_handles_deeply_nested_documents() {
        let rt = runtime(json!([]));
        let depth = 20_000;
        let a = nest(depth, JVal::from(json!({"x": 1})));
        let b = nest(depth, JVal::from(json!({"y": 2})));
        let same = nest(depth, JVal::from(json!({"x": 1})));

        let unchanged = rt.merge(a.clone(), same.clone()).await;
        assert!(unchanged.is_same(&a));

        let mut merged = rt.merge(a.clone(), b.clone()).await;
        let mut levels = 0;
        while let Some(inner) = merged.as_object().and_then(|o| o.get("a")).cloned() {
            merged = inner;
            levels += 1;
        }
        assert_eq!(levels, depth);
        assert_eq!(merged, JVal::from(json!({"x": 1, "y": 2})));

        for value in [a, b, same, unchanged] {
            release(value);
        }
    }

    #[tokio::test]
    async fn alter_value_classifies_updater_failures() {
        let rt = runtime(json!([]));
        let err = rt
            .alter_value(JVal::Null, |_| async { Err::<JVal, _>(io::Error::other("boom")) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);
    }

    #[test]
    fn helpers() {
        let rt = runtime(json!([]));
        let err = rt.assert_type(&JVal::Null, JplType::String).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
        assert_eq!(err.message(), "unexpected null, expected string");
        assert!(rt.assert_type(&JVal::from("s"), JplType::String).is_ok());

        let err = rt.normalize_values(&json!({}), "inputs").unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(rt.normalize_values(&json!([1, 2]), "inputs").unwrap().len(), 2);
        assert!(!rt.truthy(&JVal::Bool(false)));
        assert_eq!(rt.compare(&JVal::Null, &JVal::Bool(false)), Ordering::Less);
    }

    #[test]
    fn registry_replaces_by_name() {
        let mut operators = Operators::empty();
        assert!(!operators.register("x", crate::ops::Void));
        assert!(operators.register("x", crate::ops::Void));
        assert_eq!(operators.names(), vec!["x"]);
        assert!(Operators::new().contains("\"$\""));
    }
}
