//! Continuation protocol between operators and the engine.
//!
//! An operator hands its results to a [`Piper`] (its continuation). Piping a
//! value never runs the rest of the pipeline: it returns an [`Output`] that
//! holds either finished values or pending continuations, and the engine's
//! driver loop advances the pending ones. Pipeline length therefore never
//! shows up as native stack depth.

use crate::error::JplError;
use crate::jval::JVal;
use crate::program::Pipe;
use crate::scope::Scope;
use std::fmt;
use std::rc::Rc;

type Callback = dyn Fn(JVal, Scope) -> Result<Output, JplError>;

/// Continuation handed to an operator.
#[derive(Clone)]
pub struct Piper(pub(crate) Kind);

#[derive(Clone)]
pub(crate) enum Kind {
    /// Terminal continuation: the value is a final result.
    Emit,
    /// Resume `frame.pipe` at the given instruction index.
    Step(Rc<Frame>, usize),
    Func(Rc<Callback>),
}

/// A pipe being executed and the continuation that follows it.
pub(crate) struct Frame {
    pub(crate) pipe: Pipe,
    pub(crate) next: Piper,
}

impl Frame {
    pub(crate) fn new(pipe: Pipe, next: Piper) -> Self {
        Self { pipe, next }
    }
}

impl Piper {
    /// Continuation that collects values as final results.
    pub fn emit() -> Self {
        Piper(Kind::Emit)
    }

    /// Continuation backed by a host callback. The callback runs from the
    /// engine's driver loop, never from inside `pipe`.
    pub fn func<F>(f: F) -> Self
    where
        F: Fn(JVal, Scope) -> Result<Output, JplError> + 'static,
    {
        Piper(Kind::Func(Rc::new(f)))
    }

    pub(crate) fn step(frame: Rc<Frame>, index: usize) -> Self {
        Piper(Kind::Step(frame, index))
    }

    /// Continue the pipeline with `value` in `scope`.
    pub fn pipe(&self, value: JVal, scope: Scope) -> Output {
        match &self.0 {
            Kind::Emit => Output::value(value),
            _ => Output::from_pending(Pending {
                piper: self.clone(),
                value,
                scope,
            }),
        }
    }

    pub fn is_emit(&self) -> bool {
        matches!(self.0, Kind::Emit)
    }
}

impl fmt::Debug for Piper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Kind::Emit => f.write_str("Piper::Emit"),
            Kind::Step(frame, index) => write!(f, "Piper::Step({index}/{})", frame.pipe.len()),
            Kind::Func(_) => f.write_str("Piper::Func"),
        }
    }
}

/// A continuation scheduled but not yet run.
pub(crate) struct Pending {
    pub(crate) piper: Piper,
    pub(crate) value: JVal,
    pub(crate) scope: Scope,
}

pub(crate) enum Item {
    Value(JVal),
    Pending(Pending),
}

/// Results of an operator invocation, in emission order.
#[derive(Default)]
pub struct Output {
    items: Vec<Item>,
}

impl Output {
    /// No results; the branch ends here.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn value(value: JVal) -> Self {
        Self {
            items: vec![Item::Value(value)],
        }
    }

    pub fn values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = JVal>,
    {
        Self {
            items: values.into_iter().map(Item::Value).collect(),
        }
    }

    pub fn extend(&mut self, other: Output) {
        self.items.extend(other.items);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn from_pending(pending: Pending) -> Self {
        Self {
            items: vec![Item::Pending(pending)],
        }
    }

    /// The lone pending continuation, if that is all this output holds.
    pub(crate) fn into_tail(mut self) -> Result<Pending, Output> {
        if matches!(self.items.as_slice(), [Item::Pending(_)]) {
            if let Some(Item::Pending(pending)) = self.items.pop() {
                return Ok(pending);
            }
        }
        Err(self)
    }

    pub(crate) fn into_items(self) -> Vec<Item> {
        self.items
    }
}

impl FromIterator<Output> for Output {
    fn from_iter<T: IntoIterator<Item = Output>>(iter: T) -> Self {
        let mut out = Output::empty();
        for output in iter {
            out.extend(output);
        }
        out
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for item in &self.items {
            match item {
                Item::Value(value) => list.entry(value),
                Item::Pending(pending) => list.entry(&pending.piper),
            };
        }
        list.finish()
    }
}
