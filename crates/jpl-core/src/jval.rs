use crate::compare::compare;
use crate::error::JplError;
use crate::flow::{Output, Piper};
use crate::program::Pipe;
use crate::runtime::Runtime;
use crate::scope::Scope;
use indexmap::IndexMap;
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

/// Entries of an object value, in insertion order.
pub type Object = IndexMap<String, JVal>;

/// Largest integer an `f64` holds exactly; integral numbers below it strip to
/// JSON integers.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Normalized JPL value.
///
/// Composite payloads sit behind `Rc`, so clones are cheap and can be shared
/// between pipeline branches. A value is never mutated in place: derived values
/// go through `Rc::make_mut` on a private handle (see [`crate::apply`]).
#[derive(Debug, Clone)]
pub enum JVal {
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(Rc<Vec<JVal>>),
    Object(Rc<Object>),
    Function(Function),
}

/// Type tag of a [`JVal`].
///
/// Variant order is the canonical cross-type order of the comparator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JplType {
    Null,
    Boolean,
    Number,
    String,
    Array,
    Object,
    Function,
}

impl JplType {
    pub fn name(self) -> &'static str {
        match self {
            JplType::Null => "null",
            JplType::Boolean => "boolean",
            JplType::Number => "number",
            JplType::String => "string",
            JplType::Array => "array",
            JplType::Object => "object",
            JplType::Function => "function",
        }
    }
}

impl fmt::Display for JplType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl JVal {
    #[inline]
    pub fn type_of(&self) -> JplType {
        match self {
            JVal::Null => JplType::Null,
            JVal::Bool(_) => JplType::Boolean,
            JVal::Number(_) => JplType::Number,
            JVal::String(_) => JplType::String,
            JVal::Array(_) => JplType::Array,
            JVal::Object(_) => JplType::Object,
            JVal::Function(_) => JplType::Function,
        }
    }

    /// Everything except `null` and `false` is truthy.
    #[inline]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, JVal::Null | JVal::Bool(false))
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            JVal::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            JVal::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            JVal::String(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    #[inline]
    pub fn as_array(&self) -> Option<&[JVal]> {
        match self {
            JVal::Array(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    #[inline]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            JVal::Object(entries) => Some(entries.as_ref()),
            _ => None,
        }
    }

    #[inline]
    pub fn as_function(&self) -> Option<&Function> {
        match self {
            JVal::Function(func) => Some(func),
            _ => None,
        }
    }

    /// Identity check: equal scalars, or composites sharing one allocation.
    pub fn is_same(&self, other: &JVal) -> bool {
        match (self, other) {
            (JVal::Null, JVal::Null) => true,
            (JVal::Bool(a), JVal::Bool(b)) => a == b,
            (JVal::Number(a), JVal::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (JVal::String(a), JVal::String(b)) => Rc::ptr_eq(a, b) || a == b,
            (JVal::Array(a), JVal::Array(b)) => Rc::ptr_eq(a, b),
            (JVal::Object(a), JVal::Object(b)) => Rc::ptr_eq(a, b),
            (JVal::Function(a), JVal::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Deep projection to JSON. Function values are rejected.
    pub fn strip(&self) -> Result<Value, JplError> {
        self.strip_with(&mut |func: &Function| {
            Err(JplError::type_conversion(format!(
                "function({}) has no JSON representation",
                func.params().join(", ")
            )))
        })
    }

    /// Deep projection to JSON, deferring function values to `visitor`.
    ///
    /// `Ok(None)` from the visitor elides the function: object entries are
    /// dropped, array slots and the top level become `null`.
    pub fn strip_with<F>(&self, visitor: &mut F) -> Result<Value, JplError>
    where
        F: FnMut(&Function) -> Result<Option<Value>, JplError>,
    {
        Ok(strip_entry(self, visitor)?.unwrap_or(Value::Null))
    }

    /// JSON text of the value. With `unescape_string`, a string value yields
    /// its raw content instead of a quoted literal.
    pub fn stringify(&self, unescape_string: bool) -> Result<String, JplError> {
        if let (true, JVal::String(s)) = (unescape_string, self) {
            return Ok(s.to_string());
        }
        let json = self.strip()?;
        serde_json::to_string(&json).map_err(|err| {
            JplError::type_conversion("value cannot be serialized").with_cause(err)
        })
    }
}

fn strip_entry<F>(value: &JVal, visitor: &mut F) -> Result<Option<Value>, JplError>
where
    F: FnMut(&Function) -> Result<Option<Value>, JplError>,
{
    let stripped = match value {
        JVal::Null => Value::Null,
        JVal::Bool(b) => Value::Bool(*b),
        JVal::Number(n) => number_to_json(*n),
        JVal::String(s) => Value::String(s.to_string()),
        JVal::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items.iter() {
                out.push(strip_entry(item, visitor)?.unwrap_or(Value::Null));
            }
            Value::Array(out)
        }
        JVal::Object(entries) => {
            let mut out = Map::with_capacity(entries.len());
            for (key, item) in entries.iter() {
                if let Some(stripped) = strip_entry(item, visitor)? {
                    out.insert(key.clone(), stripped);
                }
            }
            Value::Object(out)
        }
        JVal::Function(func) => return visitor(func),
    };
    Ok(Some(stripped))
}

fn number_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < MAX_SAFE_INTEGER {
        return Value::Number(Number::from(n as i64));
    }
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

impl PartialEq for JVal {
    fn eq(&self, other: &Self) -> bool {
        compare(self, other) == Ordering::Equal
    }
}

impl Eq for JVal {}

impl PartialOrd for JVal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for JVal {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(self, other)
    }
}

impl From<&Value> for JVal {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => JVal::Null,
            Value::Bool(b) => JVal::Bool(*b),
            Value::Number(n) => n.as_f64().map_or(JVal::Null, JVal::Number),
            Value::String(s) => JVal::String(Rc::from(s.as_str())),
            Value::Array(arr) => JVal::Array(Rc::new(arr.iter().map(JVal::from).collect())),
            Value::Object(obj) => JVal::Object(Rc::new(
                obj.iter()
                    .map(|(k, v)| (k.clone(), JVal::from(v)))
                    .collect(),
            )),
        }
    }
}

impl From<Value> for JVal {
    fn from(v: Value) -> Self {
        JVal::from(&v)
    }
}

impl From<bool> for JVal {
    fn from(b: bool) -> Self {
        JVal::Bool(b)
    }
}

impl From<f64> for JVal {
    fn from(n: f64) -> Self {
        JVal::Number(n)
    }
}

impl From<i64> for JVal {
    fn from(n: i64) -> Self {
        JVal::Number(n as f64)
    }
}

impl From<&str> for JVal {
    fn from(s: &str) -> Self {
        JVal::String(Rc::from(s))
    }
}

impl From<String> for JVal {
    fn from(s: String) -> Self {
        JVal::String(Rc::from(s))
    }
}

impl From<Vec<JVal>> for JVal {
    fn from(items: Vec<JVal>) -> Self {
        JVal::Array(Rc::new(items))
    }
}

impl From<Object> for JVal {
    fn from(entries: Object) -> Self {
        JVal::Object(Rc::new(entries))
    }
}

impl From<Function> for JVal {
    fn from(func: Function) -> Self {
        JVal::Function(func)
    }
}

/// Host callback behind a native function: runtime, pipe input, call
/// arguments, caller scope and the caller's continuation.
pub type NativeFn =
    Rc<dyn Fn(&Runtime, JVal, Vec<JVal>, &Scope, Piper) -> Result<Output, JplError>>;

/// What a function closes over.
#[derive(Clone)]
pub enum Closure {
    /// Lexical scope of the definition site.
    Scoped(Scope),
    /// No enclosing scope; calls start from a fresh root holding these presets.
    Orphan(Object),
    /// Host code; the function has no body of its own.
    Native(NativeFn),
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Closure::Scoped(scope) => f.debug_tuple("Scoped").field(scope).finish(),
            Closure::Orphan(presets) => f.debug_tuple("Orphan").field(presets).finish(),
            Closure::Native(_) => f.write_str("Native"),
        }
    }
}

#[derive(Debug)]
pub struct FunctionDef {
    pub params: Vec<String>,
    pub body: Pipe,
    pub closure: Closure,
}

/// JPL function value. Clones share the definition.
#[derive(Clone)]
pub struct Function(Rc<FunctionDef>);

impl Function {
    pub fn scoped(params: Vec<String>, body: Pipe, scope: Scope) -> Self {
        Self(Rc::new(FunctionDef {
            params,
            body,
            closure: Closure::Scoped(scope),
        }))
    }

    pub fn orphan(params: Vec<String>, body: Pipe, presets: Object) -> Self {
        Self(Rc::new(FunctionDef {
            params,
            body,
            closure: Closure::Orphan(presets),
        }))
    }

    /// Function implemented by the host. Calls hand `f` their arguments as-is.
    pub fn native<F>(f: F) -> Self
    where
        F: Fn(&Runtime, JVal, Vec<JVal>, &Scope, Piper) -> Result<Output, JplError> + 'static,
    {
        Self(Rc::new(FunctionDef {
            params: Vec::new(),
            body: Pipe::default(),
            closure: Closure::Native(Rc::new(f)),
        }))
    }

    pub fn params(&self) -> &[String] {
        &self.0.params
    }

    pub fn body(&self) -> &Pipe {
        &self.0.body
    }

    pub fn closure(&self) -> &Closure {
        &self.0.closure
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({})", self.0.params.join(", "))
    }
}
