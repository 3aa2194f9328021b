//! Panic containment for tasks and the scheduler loop
//!
//! A process-wide panic hook records a backtrace for panics raised inside
//! [`contain`] and leaves every other panic to the previous hook.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;
use std::thread;

thread_local! {
    static CONTAINED: Cell<bool> = const { Cell::new(false) };
    static BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// A panic caught by [`contain`]
#[derive(Debug, Clone)]
pub(crate) struct PanicReport {
    pub(crate) message: String,
    pub(crate) thread: String,
    pub(crate) backtrace: String,
}

fn install_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CONTAINED.with(Cell::get) {
                let trace = Backtrace::force_capture().to_string();
                BACKTRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            } else {
                previous(info);
            }
        }));
    });
}

/// Run `f`, turning a panic into a [`PanicReport`]
pub(crate) fn contain<R>(f: impl FnOnce() -> R) -> Result<R, PanicReport> {
    install_hook();
    let outer = CONTAINED.with(|c| c.replace(true));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    CONTAINED.with(|c| c.set(outer));

    result.map_err(|payload| PanicReport {
        message: panic_message(payload.as_ref()),
        thread: thread::current().name().unwrap_or("unnamed").to_string(),
        backtrace: BACKTRACE
            .with(|slot| slot.borrow_mut().take())
            .unwrap_or_else(|| "unavailable".to_string()),
    })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
