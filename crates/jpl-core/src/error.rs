//! Error taxonomy and the adapter that classifies operator failures.
//!
//! Operators may fail with anything that converts into [`BoxError`]. The
//! adapter lets [`JplError`]s through untouched and wraps every other failure
//! into an `ExecutionError` that keeps the original as its `source()`.

use crate::jval::JVal;
use std::fmt;
use std::future::Future;

pub type BoxError = Box<dyn std::error::Error + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed program; raised before execution starts.
    Syntax,
    Runtime,
    Reference,
    Type,
    TypeConversion,
    ZeroDivision,
    /// Unrecognized operator failure, always carrying a cause.
    Execution,
    /// Engine or program integrity violation. Never reclassified.
    Fatal,
}

impl ErrorKind {
    /// Membership in the `RuntimeError` family.
    pub fn is_runtime(self) -> bool {
        matches!(
            self,
            ErrorKind::Runtime
                | ErrorKind::Reference
                | ErrorKind::Type
                | ErrorKind::TypeConversion
                | ErrorKind::ZeroDivision
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Runtime => "RuntimeError",
            ErrorKind::Reference => "ReferenceError",
            ErrorKind::Type => "TypeError",
            ErrorKind::TypeConversion => "TypeConversionError",
            ErrorKind::ZeroDivision => "ZeroDivisionError",
            ErrorKind::Execution => "ExecutionError",
            ErrorKind::Fatal => "FatalError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a failure was raised: the instruction's op and its index in the pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEnclosure {
    pub op: String,
    pub step: usize,
}

#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct JplError {
    kind: ErrorKind,
    message: String,
    value: Option<JVal>,
    enclosure: Option<ErrorEnclosure>,
    #[source]
    cause: Option<BoxError>,
}

impl JplError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            value: None,
            enclosure: None,
            cause: None,
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }

    pub fn reference(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Reference, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeConversion, message)
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ZeroDivision, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    /// Wrap a failure of unknown kind.
    pub fn execution(cause: BoxError) -> Self {
        Self::new(ErrorKind::Execution, cause.to_string()).with_cause(cause)
    }

    /// Attach the value that caused the failure.
    pub fn with_value(mut self, value: JVal) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Record the raising instruction unless a position is already known.
    /// Fatal errors pass verbatim.
    pub fn enclose(mut self, op: &str, step: usize) -> Self {
        if self.kind != ErrorKind::Fatal && self.enclosure.is_none() {
            self.enclosure = Some(ErrorEnclosure {
                op: op.to_string(),
                step,
            });
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn value(&self) -> Option<&JVal> {
        self.value.as_ref()
    }

    pub fn enclosure(&self) -> Option<&ErrorEnclosure> {
        self.enclosure.as_ref()
    }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref()
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == ErrorKind::Fatal
    }
}

/// Classify a failure raised inside operator code.
pub fn adapt_error(err: BoxError) -> JplError {
    match err.downcast::<JplError>() {
        Ok(known) => *known,
        Err(other) => JplError::execution(other),
    }
}

pub fn adapt_errors<T, E, F>(f: F) -> Result<T, JplError>
where
    F: FnOnce() -> Result<T, E>,
    E: Into<BoxError>,
{
    f().map_err(|err| adapt_error(err.into()))
}

pub async fn adapt_errors_async<T, E, Fut>(fut: Fut) -> Result<T, JplError>
where
    Fut: Future<Output = Result<T, E>>,
    E: Into<BoxError>,
{
    fut.await.map_err(|err| adapt_error(err.into()))
}
