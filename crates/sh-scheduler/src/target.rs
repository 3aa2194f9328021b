//! Invocation targets and run-queue tasks

use sh_core::Trigger;
use std::fmt;
use std::sync::Arc;

use crate::error::TaskError;

/// Something a worker can run with a trigger context
pub trait Invoke: Send + Sync {
    fn invoke(&self, trigger: &Trigger) -> Result<(), TaskError>;
}

/// Plain function target
pub type MethodFn = dyn Fn(&Trigger) -> Result<(), TaskError> + Send + Sync;

/// What a scheduler entry or trigger runs
#[derive(Clone)]
pub enum Target {
    Item(Arc<dyn Invoke>),
    Logic(Arc<dyn Invoke>),
    Method(Arc<MethodFn>),
}

impl Target {
    /// Wrap a closure as a method target
    pub fn method<F>(f: F) -> Self
    where
        F: Fn(&Trigger) -> Result<(), TaskError> + Send + Sync + 'static,
    {
        Target::Method(Arc::new(f))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Target::Item(_) => "item",
            Target::Logic(_) => "logic",
            Target::Method(_) => "method",
        }
    }

    /// Run the target on the current thread
    pub fn invoke(&self, trigger: &Trigger) -> Result<(), TaskError> {
        match self {
            Target::Item(target) | Target::Logic(target) => target.invoke(trigger),
            Target::Method(f) => f(trigger),
        }
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Target::{}", self.kind())
    }
}

/// One unit of work on the run queue
#[derive(Debug, Clone)]
pub struct Task {
    /// Lower runs first
    pub priority: i32,
    pub name: String,
    pub target: Target,
    pub trigger: Trigger,
}

impl Task {
    /// Run the task, returning its result
    pub fn run(&self) -> Result<(), TaskError> {
        self.target.invoke(&self.trigger)
    }
}
