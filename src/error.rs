//! The error taxonomy shared by every component of the engine.
//!
//! Each variant corresponds to one of the abstract kinds named in the
//! engine's design: `ModelError`, `UserError`, `WrongValue`, `WrongType`,
//! `UnknownElement`/`UnknownId`, `LoadError`, `LoadDataError`,
//! `SyntaxError` and `Internal`. Keeping them in one enum (rather than
//! one type per component) is what lets `check=skip/no` recover locally:
//! callers match on `ConfigError` and decide whether to convert it to a
//! logged, swallowed error or let it propagate.
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The schema itself is inconsistent: conflicting defaults, an
    /// unknown `value_type`, a cyclic warp, a fix loop that never
    /// converges. Always fatal.
    #[error("model error at '{path}': {reason}")]
    Model { path: String, reason: String },

    /// Reading a mandatory-empty leaf, touching a hidden element, or
    /// accessing an obsolete one.
    #[error("user error at '{path}': {reason}")]
    User { path: String, reason: String },

    /// A store or fetch failed schema-level validation (type, bounds,
    /// match, grammar, assert).
    #[error("wrong value for '{path}': {reason}")]
    WrongValue { path: String, reason: String },

    /// An operation was attempted against an element of the wrong kind
    /// (e.g. `:id` against a leaf, `.push` against a node).
    #[error("wrong type at '{path}': expected {expected}, found {found}")]
    WrongType {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    /// A named element does not exist and is not acceptable.
    #[error("unknown element '{0}'")]
    UnknownElement(String),

    /// A collection index does not exist and is not creatable.
    #[error("unknown id '{0}' in '{1}'")]
    UnknownId(String, String),

    /// Parse or execution failure in the Loader DSL. Carries the
    /// offending command fragment.
    #[error("load error: {0} (at: {1})")]
    Load(String, String),

    /// A structured-data load (`=.json`/`=.yaml`) found a mismatching
    /// shape. Carries the offending sub-path.
    #[error("load data error: {0} (path: {1})")]
    LoadData(String, String),

    /// Reported by a backend, with file/line context attached.
    #[error("syntax error in {file}:{line}: {message}")]
    Syntax {
        file: String,
        line: usize,
        message: String,
    },

    /// An engine invariant was violated; this is always a bug.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("invalid regular expression: {0}")]
    Regex(String),

    #[error(transparent)]
    Io(#[from] IoErrorWrapper),
}

impl From<regex::Error> for ConfigError {
    fn from(e: regex::Error) -> Self {
        ConfigError::Regex(e.to_string())
    }
}

/// `std::io::Error` isn't `Clone`, but `ConfigError` needs to be (it is
/// stored in the Instance's per-path error map and compared in tests),
/// so I/O failures are flattened to their message immediately.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct IoErrorWrapper(pub String);

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(IoErrorWrapper(e.to_string()))
    }
}

/// How a failed validation should be handled.
///
/// - `Yes`  — reject: raise the error, abort the operation.
/// - `Skip` — keep the prior value, record the error on the Instance,
///   warn unless silenced.
/// - `No`   — store the bad value anyway, but still record the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckPolicy {
    #[default]
    Yes,
    Skip,
    No,
}
