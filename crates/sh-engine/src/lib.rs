//! Item and logic engine for smarthome
//!
//! This crate turns the configured item tree and logic definitions into a
//! running [`SmartHome`]:
//!
//! - [`Item`] - typed value nodes with change detection, hooks, caching,
//!   thresholds, timers and cancellable fades
//! - [`Expression`] - item `eval` expressions, evaluated with minijinja
//! - [`ItemRegistry`] - path lookup and pattern queries
//! - [`Logic`] - triggerable behaviour run through a [`LogicRunner`]
//! - [`Plugin`] - the registration contract for integrations
//!
//! Value changes propagate to dependent items (`eval_trigger`) and to
//! watching logics (`watch_item`) through the scheduler's run queue.

mod cache;
mod error;
mod expression;
mod fade;
mod item;
mod logic;
mod plugin;
mod registry;
mod smarthome;

pub use cache::{CachedValue, ValueCache};
pub use error::{
    CacheError, CacheResult, EvalError, EvalResult, HookError, ItemError, ItemResult, LogicError,
    LogicResult,
};
pub use expression::{display_value, expand_aggregate, is_aggregate, truthy, Expression, ItemAttr, ItemScope};
pub use item::{AutoTimer, Item, Threshold, CHANGES_TARGET, CORE_ATTRIBUTES};
pub use logic::{CallbackRunner, Logic, LogicRunner, ScriptRunner};
pub use plugin::{method_hook, MethodHook, Plugin, SharedPlugin};
pub use registry::ItemRegistry;
pub use smarthome::{SmartHome, CONNECTIONS_JOB};
