//! Core types for smarthome
//!
//! This crate provides the fundamental types shared by the scheduler and the
//! item engine: the dynamic [`Value`], the item [`ItemType`] with its cast
//! rules, the [`Trigger`] context passed along every invocation, and the
//! [`Clock`] abstraction used for all wall-clock reads.

mod clock;
mod trigger;
mod value;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use trigger::Trigger;
pub use value::{cast, type_default, values_equal, CastError, ItemType, ItemTypeError};

/// Dynamic value carried by items, triggers and expressions
pub type Value = serde_json::Value;

/// Well-known caller names used in `changed_by` and trigger context
pub mod callers {
    /// Value set by a fired scheduler entry
    pub const SCHEDULER: &str = "Scheduler";

    /// Value set by a one-shot item timer
    pub const TIMER: &str = "Timer";

    /// Value set by a self-rearming autotimer
    pub const AUTOTIMER: &str = "Autotimer";

    /// Final authoritative set at the end of a fade
    pub const FADER: &str = "Fader";

    /// Intermediate fade step; does not cancel the running fade
    pub const FADER_STEP: &str = "fader";

    /// Value produced by an eval expression
    pub const EVAL: &str = "Eval";

    /// Startup evaluation after wiring
    pub const INIT: &str = "Init";

    /// Default caller for logic triggers
    pub const LOGIC: &str = "Logic";

    /// Logic triggered by an item change
    pub const ITEM: &str = "Item";
}
