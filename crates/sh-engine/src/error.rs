//! Error types for the item engine

use sh_core::{CastError, ItemType};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for item operations
pub type ItemResult<T> = Result<T, ItemError>;

/// Result type for expression compilation and evaluation
pub type EvalResult<T> = Result<T, EvalError>;

/// Result type for value cache access
pub type CacheResult<T> = Result<T, CacheError>;

/// Result type for logic execution
pub type LogicResult<T> = Result<T, LogicError>;

/// Errors raised by items
#[derive(Debug, Error)]
pub enum ItemError {
    /// A value could not be cast to the item's type; the item is unchanged
    #[error("item {path}: cannot set value from {caller}: {source}")]
    Cast {
        path: String,
        caller: String,
        #[source]
        source: CastError,
    },

    /// A configured attribute is malformed
    #[error("item {path}: invalid attribute '{attribute}': {reason}")]
    InvalidAttribute {
        path: String,
        attribute: String,
        reason: String,
    },

    /// Another item already uses this path
    #[error("duplicate item path: {path}")]
    DuplicatePath { path: String },

    /// The item outlived its environment
    #[error("item {path} is not attached to a running environment")]
    Detached { path: String },

    /// A fade was requested on a non-numeric item
    #[error("item {path}: cannot fade an item of type {item_type}")]
    NotNumeric { path: String, item_type: ItemType },

    /// Fade parameters are out of range
    #[error("item {path}: invalid fade: {reason}")]
    InvalidFade { path: String, reason: String },
}

/// Errors raised while compiling or evaluating an expression
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("syntax error: {message}")]
    Syntax { message: String },

    /// A name that is neither a trigger variable, `sh` nor a function
    #[error("unknown name: {name}")]
    UnknownName { name: String },

    #[error("{function}() takes {expected} argument(s), {found} given")]
    Arity {
        function: &'static str,
        expected: &'static str,
        found: usize,
    },

    #[error("type error: {message}")]
    Type { message: String },

    /// Evaluation failed, e.g. an unknown item or a bad operand
    #[error("evaluation failed: {message}")]
    Runtime { message: String },
}

impl EvalError {
    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        EvalError::Type {
            message: message.into(),
        }
    }
}

impl From<minijinja::Error> for EvalError {
    fn from(err: minijinja::Error) -> Self {
        match err.kind() {
            minijinja::ErrorKind::SyntaxError => EvalError::Syntax {
                message: err.to_string(),
            },
            _ => EvalError::Runtime {
                message: err.to_string(),
            },
        }
    }
}

/// Errors reading or writing cached item values
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to read cache file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write cache file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt cache file {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode cache value for {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised while running or reloading a logic
#[derive(Debug, Error)]
pub enum LogicError {
    #[error("logic {name}: no source file configured")]
    NoSource { name: String },

    #[error("logic {name}: cannot read {}: {source}", path.display())]
    Read {
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("logic {name}: failed to start {interpreter}: {source}")]
    Spawn {
        name: String,
        interpreter: String,
        #[source]
        source: std::io::Error,
    },

    #[error("logic {name}: exited with {status}: {stderr}")]
    Failed {
        name: String,
        status: String,
        stderr: String,
    },

    #[error("logic {name}: {message}")]
    Callback { name: String, message: String },
}

/// Error returned by a plugin method hook
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
