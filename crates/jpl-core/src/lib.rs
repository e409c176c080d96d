//! JPL Core crate: the execution core of the JPL pipeline language.
//!
//! The crate is layered leaves first:
//!
//! - `jval`, `compare`, `apply`: the normalized value model, its total order
//!   and copy-on-write change application.
//! - `mux`: cartesian-product fan-out of callbacks over argument lists.
//! - `scope`, `error`: lexical scopes with the per-execution cancellation
//!   signal, and the error taxonomy with its classifying adapter.
//! - `program`, `flow`, `runtime`: program documents compiled into pipes, the
//!   continuation protocol, and the stack-safe engine that drives them.
//! - `ops`, `engine`: the built-in operators and the host-facing facade.
//!
//! Execution model (high level):
//!
//! 1. Parse and compile once (`Engine::load`). Every operator maps its raw
//!    params exactly once.
//! 2. Execute many times (`Runtime::execute`). Each input runs the pipe in
//!    continuation-passing style; operators may continue zero, one or many
//!    times and branches run concurrently.
//! 3. Every execution owns a `Signal`; it is exited when the execution ends,
//!    and exiting it from the host stops the execution at its next step.

pub mod apply;
pub mod compare;
pub mod engine;
pub mod error;
pub mod flow;
pub mod jval;
pub mod mux;
pub mod ops;
pub mod program;
pub mod runtime;
pub mod scope;

pub use apply::{ObjectChange, apply_array, apply_combinations, apply_object};
pub use compare::{compare, compare_arrays, compare_objects, compare_strings, equals};
pub use engine::Engine;
pub use error::{
    BoxError, ErrorEnclosure, ErrorKind, JplError, adapt_error, adapt_errors, adapt_errors_async,
};
pub use flow::{Output, Piper};
pub use jval::{Closure, Function, JVal, JplType, NativeFn, Object};
pub use mux::{mux, mux_all, mux_async, mux_one};
pub use program::{Instruction, Pipe, Program, ProgramDefinition, parse_program};
pub use runtime::{OpFuture, Operator, Operators, Runtime, RuntimeOptions, ready};
pub use scope::{Scope, Signal};
