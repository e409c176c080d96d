//! Built-in operators.
//!
//! | op | params |
//! |---|---|
//! | `nul`, `tru`, `fls` | `{}` |
//! | `nbr` | `{ number }` |
//! | `""` | `{ string }` |
//! | `cnt` | `{ value }` |
//! | `vod` | `{}` |
//! | `var` | `{ name }` |
//! | `va=` | `{ name, pipe }` |
//! | `fun` | `{ argNames, pipe }` |
//! | `,` | `{ pipes }` |
//! | `"$"` | `{ interpolations: [{ before, pipe }], after }` |

use crate::error::{BoxError, JplError};
use crate::flow::{Output, Piper};
use crate::jval::{Function, JVal, JplType};
use crate::mux::{mux, mux_async};
use crate::program::Pipe;
use crate::runtime::{OpFuture, Operator, Operators, Runtime, ready};
use crate::scope::Scope;
use futures::FutureExt;
use serde_json::{Map, Value};

pub(crate) fn register_builtins(operators: &mut Operators) {
    operators.register("nul", Constant(JVal::Null));
    operators.register("tru", Constant(JVal::Bool(true)));
    operators.register("fls", Constant(JVal::Bool(false)));
    operators.register("nbr", Literal::typed("number", JplType::Number));
    operators.register("\"\"", Literal::typed("string", JplType::String));
    operators.register("cnt", Literal::any("value"));
    operators.register("vod", Void);
    operators.register("var", Variable);
    operators.register("va=", VariableDefinition);
    operators.register("fun", FunctionDefinition);
    operators.register(",", OutputConcat);
    operators.register("\"$\"", InterpolatedString);
}

fn param<'a>(params: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    params.get(key).filter(|value| !value.is_null())
}

fn require_str(params: &Map<String, Value>, key: &str) -> Result<String, JplError> {
    param(params, key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| JplError::syntax(format!("expected '{key}' to be a string")))
}

/// Missing strings read as empty.
fn optional_str(params: &Map<String, Value>, key: &str) -> Result<String, JplError> {
    match param(params, key) {
        None => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(JplError::syntax(format!("expected '{key}' to be a string"))),
    }
}

fn require_array<'a>(params: &'a Map<String, Value>, key: &str) -> Result<&'a [Value], JplError> {
    match param(params, key) {
        None => Ok(&[]),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(JplError::syntax(format!("expected '{key}' to be an array"))),
    }
}

/// Missing pipes are empty and pass their input through.
fn pipe_param(
    operators: &Operators,
    params: &Map<String, Value>,
    key: &str,
) -> Result<Pipe, JplError> {
    operators.compile(params.get(key).unwrap_or(&Value::Null))
}

/// Emits a fixed value.
pub struct Constant(pub JVal);

impl Operator for Constant {
    type Params = ();

    fn map(&self, _operators: &Operators, _params: &Map<String, Value>) -> Result<(), JplError> {
        Ok(())
    }

    fn op<'a>(
        &'a self,
        _runtime: &'a Runtime,
        _input: JVal,
        _params: &'a (),
        scope: Scope,
        next: Piper,
    ) -> OpFuture<'a> {
        ready(Ok(next.pipe(self.0.clone(), scope)))
    }
}

/// Emits the value found under `key` in the params, checked against
/// `expected` when set.
pub struct Literal {
    key: &'static str,
    expected: Option<JplType>,
}

impl Literal {
    pub fn typed(key: &'static str, expected: JplType) -> Self {
        Self {
            key,
            expected: Some(expected),
        }
    }

    pub fn any(key: &'static str) -> Self {
        Self { key, expected: None }
    }
}

impl Operator for Literal {
    type Params = JVal;

    fn map(&self, _operators: &Operators, params: &Map<String, Value>) -> Result<JVal, JplError> {
        let value = JVal::from(params.get(self.key).unwrap_or(&Value::Null));
        match self.expected {
            Some(expected) if value.type_of() != expected => Err(JplError::syntax(format!(
                "expected '{}' to be a {expected}",
                self.key
            ))),
            _ => Ok(value),
        }
    }

    fn op<'a>(
        &'a self,
        _runtime: &'a Runtime,
        _input: JVal,
        params: &'a JVal,
        scope: Scope,
        next: Piper,
    ) -> OpFuture<'a> {
        ready(Ok(next.pipe(params.clone(), scope)))
    }
}

/// Ends the branch without output.
pub struct Void;

impl Operator for Void {
    type Params = ();

    fn map(&self, _operators: &Operators, _params: &Map<String, Value>) -> Result<(), JplError> {
        Ok(())
    }

    fn op<'a>(
        &'a self,
        _runtime: &'a Runtime,
        _input: JVal,
        _params: &'a (),
        _scope: Scope,
        _next: Piper,
    ) -> OpFuture<'a> {
        ready(Ok(Output::empty()))
    }
}

pub struct Variable;

impl Operator for Variable {
    type Params = String;

    fn map(&self, _operators: &Operators, params: &Map<String, Value>) -> Result<String, JplError> {
        require_str(params, "name")
    }

    fn op<'a>(
        &'a self,
        _runtime: &'a Runtime,
        _input: JVal,
        name: &'a String,
        scope: Scope,
        next: Piper,
    ) -> OpFuture<'a> {
        let result = match scope.get(name) {
            Some(value) => Ok(next.pipe(value, scope)),
            None => Err(JplError::reference(format!("'{name}' is not defined"))),
        };
        ready(result)
    }
}

pub struct VariableDefinitionParams {
    name: String,
    pipe: Pipe,
}

/// Binds each output of `pipe` to `name`, continuing with the unchanged input.
pub struct VariableDefinition;

impl Operator for VariableDefinition {
    type Params = VariableDefinitionParams;

    fn map(
        &self,
        operators: &Operators,
        params: &Map<String, Value>,
    ) -> Result<VariableDefinitionParams, JplError> {
        Ok(VariableDefinitionParams {
            name: require_str(params, "name")?,
            pipe: pipe_param(operators, params, "pipe")?,
        })
    }

    fn op<'a>(
        &'a self,
        runtime: &'a Runtime,
        input: JVal,
        params: &'a VariableDefinitionParams,
        scope: Scope,
        next: Piper,
    ) -> OpFuture<'a> {
        async move {
            let values = runtime
                .execute_pipe(&params.pipe, input.clone(), scope.clone())
                .await?;
            let output: Output = values
                .into_iter()
                .map(|value| {
                    let child = scope.child([(params.name.clone(), value)]);
                    next.pipe(input.clone(), child)
                })
                .collect();
            Ok::<_, BoxError>(output)
        }
        .boxed_local()
    }
}

pub struct FunctionDefinitionParams {
    arg_names: Vec<String>,
    pipe: Pipe,
}

/// Emits a function closing over the current scope.
pub struct FunctionDefinition;

impl Operator for FunctionDefinition {
    type Params = FunctionDefinitionParams;

    fn map(
        &self,
        operators: &Operators,
        params: &Map<String, Value>,
    ) -> Result<FunctionDefinitionParams, JplError> {
        let arg_names = require_array(params, "argNames")?
            .iter()
            .map(|name| {
                name.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| JplError::syntax("expected 'argNames' to hold strings"))
            })
            .collect::<Result<_, _>>()?;
        Ok(FunctionDefinitionParams {
            arg_names,
            pipe: pipe_param(operators, params, "pipe")?,
        })
    }

    fn op<'a>(
        &'a self,
        _runtime: &'a Runtime,
        _input: JVal,
        params: &'a FunctionDefinitionParams,
        scope: Scope,
        next: Piper,
    ) -> OpFuture<'a> {
        let func = Function::scoped(params.arg_names.clone(), params.pipe.clone(), scope.clone());
        ready(Ok(next.pipe(JVal::Function(func), scope)))
    }
}

/// Runs every pipe on the input; all outputs continue, pipe by pipe.
pub struct OutputConcat;

impl Operator for OutputConcat {
    type Params = Vec<Pipe>;

    fn map(
        &self,
        operators: &Operators,
        params: &Map<String, Value>,
    ) -> Result<Vec<Pipe>, JplError> {
        require_array(params, "pipes")?
            .iter()
            .map(|raw| operators.compile(raw))
            .collect()
    }

    fn op<'a>(
        &'a self,
        runtime: &'a Runtime,
        input: JVal,
        pipes: &'a Vec<Pipe>,
        scope: Scope,
        next: Piper,
    ) -> OpFuture<'a> {
        let outer = scope.clone();
        let resume = Piper::func(move |value, _| Ok(next.pipe(value, outer.clone())));
        let output: Output = pipes
            .iter()
            .map(|pipe| {
                runtime.execute_instructions(
                    pipe,
                    vec![input.clone()],
                    scope.clone(),
                    resume.clone(),
                )
            })
            .collect();
        ready(Ok(output))
    }
}

pub struct Interpolation {
    before: String,
    pipe: Pipe,
}

pub struct InterpolatedStringParams {
    interpolations: Vec<Interpolation>,
    after: String,
}

/// Builds strings from literal parts and sub-pipeline outputs. Every
/// combination of outputs yields one string.
pub struct InterpolatedString;

impl Operator for InterpolatedString {
    type Params = InterpolatedStringParams;

    fn map(
        &self,
        operators: &Operators,
        params: &Map<String, Value>,
    ) -> Result<InterpolatedStringParams, JplError> {
        let interpolations = require_array(params, "interpolations")?
            .iter()
            .map(|entry| {
                let entry = entry
                    .as_object()
                    .ok_or_else(|| JplError::syntax("expected interpolation to be an object"))?;
                Ok(Interpolation {
                    before: optional_str(entry, "before")?,
                    pipe: pipe_param(operators, entry, "pipe")?,
                })
            })
            .collect::<Result<_, JplError>>()?;
        Ok(InterpolatedStringParams {
            interpolations,
            after: optional_str(params, "after")?,
        })
    }

    fn op<'a>(
        &'a self,
        runtime: &'a Runtime,
        input: JVal,
        params: &'a InterpolatedStringParams,
        scope: Scope,
        next: Piper,
    ) -> OpFuture<'a> {
        async move {
            let lists = vec![params.interpolations.iter().collect::<Vec<_>>()];
            let parts = mux_async(&lists, |args| {
                let (input, scope) = (input.clone(), scope.clone());
                async move {
                    let Some(interpolation) = args.first() else {
                        return Ok(Vec::new());
                    };
                    runtime
                        .execute_pipe(&interpolation.pipe, input, scope)
                        .await?
                        .iter()
                        .map(|value| {
                            let text = runtime.stringify_json(value, true)?;
                            Ok(format!("{}{text}", interpolation.before))
                        })
                        .collect::<Result<Vec<_>, JplError>>()
                }
            })
            .await?;

            let output: Output = mux(&parts, |pieces| {
                let mut text = pieces.concat();
                text.push_str(&params.after);
                next.pipe(JVal::from(text), scope.clone())
            })
            .into_iter()
            .collect();
            Ok::<_, BoxError>(output)
        }
        .boxed_local()
    }
}
