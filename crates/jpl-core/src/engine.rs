use crate::error::JplError;
use crate::jval::JVal;
use crate::program::{Program, ProgramDefinition, compile_program, parse_program};
use crate::runtime::{Operator, Operators, Runtime, RuntimeOptions};
use serde_json::Value;
use std::rc::Rc;

/// Engine-scoped execution surface for JPL programs.
///
/// Operator registration is instance-local (no global singleton), so
/// different hosts can run different operator sets side by side.
#[derive(Default)]
pub struct Engine {
    operators: Rc<Operators>,
}

impl Engine {
    /// Create a new engine with the built-in operators preloaded.
    pub fn new() -> Self {
        Self {
            operators: Rc::new(Operators::new()),
        }
    }

    /// Engine over a caller-built registry.
    pub fn with_operators(operators: Operators) -> Self {
        Self {
            operators: Rc::new(operators),
        }
    }

    /// Register or replace an operator. Programs compiled earlier keep the
    /// operators they were compiled with.
    pub fn register<O: Operator>(&mut self, name: impl Into<String>, operator: O) -> bool {
        Rc::make_mut(&mut self.operators).register(name, operator)
    }

    /// Validate and parse a program document.
    pub fn check(&self, input: &Value) -> Result<ProgramDefinition, JplError> {
        parse_program(input)
    }

    /// Compile once.
    pub fn compile(&self, definition: ProgramDefinition) -> Result<Program, JplError> {
        compile_program(definition, &self.operators)
    }

    /// Parse and compile.
    pub fn load(&self, input: &Value) -> Result<Program, JplError> {
        self.compile(self.check(input)?)
    }

    pub fn runtime(&self, program: Program, options: RuntimeOptions) -> Runtime {
        Runtime::new(program, Rc::clone(&self.operators), options)
    }

    /// Run one-shot with default options; outputs are projected back to JSON.
    pub async fn run(&self, program: &Program, inputs: &[Value]) -> Result<Vec<Value>, JplError> {
        let runtime = self.runtime(program.clone(), RuntimeOptions::default());
        let outputs = runtime.execute(inputs.iter().map(JVal::from)).await?;
        runtime.strip_values(&outputs)
    }

    /// Access the operator registry (read-only).
    pub fn operators(&self) -> &Operators {
        &self.operators
    }
}
