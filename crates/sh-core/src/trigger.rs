//! Trigger context passed along every scheduled invocation

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Value;

/// Who triggered an invocation and with what
///
/// `caller` is a short tag such as `"Scheduler"`, `"Eval"` or a logic
/// name. `source` and `dest` are free-form, typically item paths.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub caller: String,
    pub source: Option<String>,
    pub dest: Option<String>,
    pub value: Option<Value>,
}

impl Trigger {
    /// Create a trigger context for the given caller
    pub fn new(caller: impl Into<String>) -> Self {
        Self {
            caller: caller.into(),
            ..Default::default()
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_dest(mut self, dest: impl Into<String>) -> Self {
        self.dest = Some(dest.into());
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    /// The `caller:source` tag recorded in an item's `changed_by`
    pub fn changed_by(&self) -> String {
        format!("{}:{}", self.caller, self.source.as_deref().unwrap_or("None"))
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "caller: {}, source: {}, dest: {}",
            self.caller,
            self.source.as_deref().unwrap_or("None"),
            self.dest.as_deref().unwrap_or("None")
        )
    }
}
