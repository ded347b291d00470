//! Error types for the core.
//!
//! Recoverable failures (names that do not fit, missing bindings, bad
//! format strings, unknown classes) are returned as one of the enums below.
//! Programmer errors reached through a typed accessor go through [`fatal`]
//! instead; every such accessor has a `try_*` twin that returns the error.

use arbor_io::DataSourceError;
use thiserror::Error;

use crate::value::VarType;

/// Failures of variable binding and access.
#[derive(Debug, Error)]
pub enum VariableError {
    #[error("variable name `{name}` is longer than {max} bytes")]
    NameTooLong { name: String, max: usize },

    #[error("no such variable `{0}`")]
    NotFound(String),

    #[error("variable `{name}` holds {actual}, not {expected}")]
    TypeMismatch {
        name: String,
        expected: VarType,
        actual: VarType,
    },

    #[error("variable `{0}` is bound to storage that has been dropped")]
    Dangling(String),

    #[error("variable `{0}` is not a flag view")]
    NotAFlag(String),

    #[error("variable `{name}` is not numeric ({ty})")]
    NotNumeric { name: String, ty: VarType },
}

/// Failures of handler registration, argument marshalling and dispatch.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("event name `{name}` is longer than {max} bytes")]
    NameTooLong { name: String, max: usize },

    #[error("too many event arguments (limit {max})")]
    TooManyArgs { max: usize },

    #[error("bad argument format `{format}`: {reason}")]
    BadFormat { format: String, reason: &'static str },

    #[error("format `{format}` expects {expected} arguments, got {got}")]
    ArgCount {
        format: String,
        expected: usize,
        got: usize,
    },

    #[error("argument {index} is {actual}, not {expected}")]
    ArgType {
        index: usize,
        expected: VarType,
        actual: VarType,
    },

    #[error("argument index {index} out of range (argc {argc})")]
    IndexOutOfRange { index: usize, argc: usize },

    #[error("no argument named `{0}`")]
    NoSuchArg(String),

    #[error("argument {0} does not reference a live object")]
    NotAnObject(usize),

    #[error("argument {index} is not an instance of `{pattern}`")]
    WrongClass { index: usize, pattern: String },

    #[error("pop below the template arguments")]
    StackUnderflow,

    #[error("cannot spawn async handler thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Failures of tree and lifecycle operations.
#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("object name `{name}` is longer than {max} bytes")]
    NameTooLong { name: String, max: usize },

    #[error("no such object `{0}`")]
    NotFound(String),

    #[error("`{0}` is already attached")]
    AlreadyAttached(String),

    #[error("`{0}` is not attached")]
    NotAttached(String),

    #[error("attaching `{child}` under `{parent}` would create a cycle")]
    Cycle { parent: String, child: String },

    #[error("`{0}` is indestructible")]
    Indestructible(String),

    #[error("`{object}` has no dependency on `{dep}`")]
    NoSuchDependency { object: String, dep: String },
}

/// Failures of the class registry.
#[derive(Debug, Error)]
pub enum ClassError {
    #[error("no such class `{0}`")]
    NotFound(String),

    #[error("class `{0}` is already registered")]
    AlreadyRegistered(String),

    #[error("unknown namespace `{0}`")]
    UnknownNamespace(String),

    #[error("namespace `{0}` is already registered")]
    NamespaceExists(String),

    #[error("malformed class pattern `{0}`")]
    BadPattern(String),
}

/// Failures while saving or loading an object tree.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error(transparent)]
    Io(#[from] DataSourceError),

    #[error("not an arbor object stream")]
    BadMagic,

    #[error("unsupported stream version {major}.{minor}")]
    Version { major: u32, minor: u32 },

    #[error("unknown variable type code {0}")]
    BadTypeCode(u8),

    #[error("class `{class}` payload: declared {declared} bytes, consumed {consumed}")]
    Payload {
        class: String,
        declared: u64,
        consumed: u64,
    },

    #[error("class `{class}` payload of {len} bytes exceeds {max}")]
    PayloadTooLarge { class: String, len: u64, max: usize },

    /// Raised by class `load`/`save` slots, and when a node was saved by an
    /// incompatible major version of its class.
    #[error("class `{class}`: {message}")]
    Class { class: String, message: String },

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Variable(#[from] VariableError),

    #[error(transparent)]
    Registry(#[from] ClassError),
}

/// Abort on a programmer error.
///
/// The message is logged at `error` level and then the thread panics; with
/// `panic = "abort"` this terminates the process.
#[cold]
#[track_caller]
pub(crate) fn fatal(args: std::fmt::Arguments<'_>) -> ! {
    tracing::error!(location = %std::panic::Location::caller(), "{}", args);
    panic!("{}", args);
}
