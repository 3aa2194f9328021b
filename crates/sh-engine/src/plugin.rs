//! Plugin registration contract
//!
//! Plugins are opaque to the engine beyond this trait. Each is offered
//! every item and logic once at startup, gets its own thread for `run`,
//! and has `check` called by the periodic `Connections` scheduler entry.

use sh_core::Trigger;
use std::sync::Arc;

use crate::error::HookError;
use crate::item::Item;
use crate::logic::Logic;

/// Callback run synchronously inside every effective `set` of an item
///
/// The trigger carries the new value and the caller/source/dest of the
/// update. Hooks run in registration order after the value is stored.
pub type MethodHook = Arc<dyn Fn(&Item, &Trigger) -> Result<(), HookError> + Send + Sync>;

/// Shared plugin handle
pub type SharedPlugin = Arc<dyn Plugin>;

pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Called once per item; a returned hook is attached to the item
    fn parse_item(&self, _item: &Arc<Item>) -> Option<MethodHook> {
        None
    }

    /// Called once per logic
    fn parse_logic(&self, _logic: &Arc<Logic>) {}

    /// Plugin main loop, run on a dedicated thread until [`stop`](Self::stop)
    fn run(&self) {}

    fn stop(&self) {}

    /// Periodic transport check
    fn check(&self) {}
}

/// Wrap a closure as a [`MethodHook`]
pub fn method_hook<F>(f: F) -> MethodHook
where
    F: Fn(&Item, &Trigger) -> Result<(), HookError> + Send + Sync + 'static,
{
    Arc::new(f)
}
