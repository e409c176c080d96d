//! Program documents and their compiled form.
//!
//! A program is an ordered list of instructions:
//!
//! ```json
//! { "instructions": [ { "op": "nbr", "params": { "number": 1 } } ] }
//! ```
//!
//! Compilation runs every known operator's `map` exactly once per instruction,
//! turning raw JSON params into the operator's typed params (nested pipes are
//! compiled by the operator through [`Operators::compile`]). Unknown op names
//! are kept as-is so the engine can reject them at dispatch time.

use crate::error::JplError;
use crate::runtime::{ErasedOperator, Operators};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Program document envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramDefinition {
    #[serde(default)]
    pub instructions: Vec<Instruction>,
}

/// One `(op, params)` step as written in a program document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

pub(crate) struct CompiledInstruction {
    op: Rc<str>,
    operator: Option<Rc<dyn ErasedOperator>>,
    params: Rc<dyn Any>,
}

impl CompiledInstruction {
    pub(crate) fn op(&self) -> &str {
        &self.op
    }

    pub(crate) fn operator(&self) -> Option<&Rc<dyn ErasedOperator>> {
        self.operator.as_ref()
    }

    pub(crate) fn params(&self) -> &dyn Any {
        &*self.params
    }
}

/// Compiled instruction list. Clones share the instructions.
#[derive(Clone, Default)]
pub struct Pipe {
    instructions: Rc<Vec<CompiledInstruction>>,
}

impl Pipe {
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Op names in execution order.
    pub fn ops(&self) -> impl Iterator<Item = &str> + '_ {
        self.instructions.iter().map(CompiledInstruction::op)
    }

    pub(crate) fn get(&self, index: usize) -> Option<&CompiledInstruction> {
        self.instructions.get(index)
    }
}

impl fmt::Debug for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.ops()).finish()
    }
}

/// Parsed and compiled program.
#[derive(Debug, Clone)]
pub struct Program {
    definition: ProgramDefinition,
    pipe: Pipe,
}

impl Program {
    pub fn definition(&self) -> &ProgramDefinition {
        &self.definition
    }

    pub fn pipe(&self) -> &Pipe {
        &self.pipe
    }
}

/// Parse a program document. A bare instruction array is accepted as
/// shorthand for `{ "instructions": [...] }`.
pub fn parse_program(input: &Value) -> Result<ProgramDefinition, JplError> {
    let definition = match input {
        Value::Array(_) => ProgramDefinition {
            instructions: parse_instructions(input)?,
        },
        Value::Object(_) => serde_json::from_value(input.clone()).map_err(|err| {
            JplError::syntax(format!("invalid program document: {err}")).with_cause(err)
        })?,
        _ => {
            return Err(JplError::syntax(
                "program must be an instruction array or a program object",
            ));
        }
    };
    validate_instructions(&definition.instructions)?;
    Ok(definition)
}

pub fn compile_program(
    definition: ProgramDefinition,
    operators: &Operators,
) -> Result<Program, JplError> {
    let pipe = compile_instructions(operators, &definition.instructions)?;
    Ok(Program { definition, pipe })
}

/// Compile a raw pipe (`[{ op, params }]`). `null` is the empty pipe.
pub fn compile_pipe(operators: &Operators, raw: &Value) -> Result<Pipe, JplError> {
    if raw.is_null() {
        return Ok(Pipe::default());
    }
    let instructions = parse_instructions(raw)?;
    validate_instructions(&instructions)?;
    compile_instructions(operators, &instructions)
}

pub fn compile_instructions(
    operators: &Operators,
    instructions: &[Instruction],
) -> Result<Pipe, JplError> {
    let compiled = instructions
        .iter()
        .enumerate()
        .map(|(step, instruction)| compile_instruction(operators, step, instruction))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Pipe {
        instructions: Rc::new(compiled),
    })
}

fn compile_instruction(
    operators: &Operators,
    step: usize,
    instruction: &Instruction,
) -> Result<CompiledInstruction, JplError> {
    let operator = operators.get(&instruction.op).cloned();
    let params = match &operator {
        Some(operator) => operator
            .map_erased(operators, &instruction.params)
            .map_err(|err| err.enclose(&instruction.op, step))?,
        None => {
            tracing::debug!(op = %instruction.op, step, "unknown op left for dispatch");
            Rc::new(instruction.params.clone()) as Rc<dyn Any>
        }
    };
    Ok(CompiledInstruction {
        op: Rc::from(instruction.op.as_str()),
        operator,
        params,
    })
}

fn parse_instructions(raw: &Value) -> Result<Vec<Instruction>, JplError> {
    let Some(items) = raw.as_array() else {
        return Err(JplError::syntax("pipe must be an array of instructions"));
    };
    items
        .iter()
        .enumerate()
        .map(|(step, item)| {
            serde_json::from_value(item.clone()).map_err(|err| {
                JplError::syntax(format!("invalid instruction at {step}: {err}")).with_cause(err)
            })
        })
        .collect()
}

fn validate_instructions(instructions: &[Instruction]) -> Result<(), JplError> {
    for (step, instruction) in instructions.iter().enumerate() {
        if instruction.op.is_empty() {
            return Err(JplError::syntax(format!(
                "instruction at {step} has an empty op"
            )));
        }
    }
    Ok(())
}
