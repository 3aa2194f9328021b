//! Cooperative fade cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Cancellation flag of one fade run
///
/// Clones share the flag. Once cancelled, a token stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn same(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// The fade currently owning an item, if any
///
/// Starting a fade cancels the previous one, so the last fade wins.
#[derive(Debug, Default)]
pub(crate) struct FadeSlot {
    current: Mutex<Option<CancelToken>>,
}

impl FadeSlot {
    /// Cancel any running fade and hand out the token of a new one
    pub(crate) fn begin(&self) -> CancelToken {
        let token = CancelToken::new();
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = current.replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Cancel the running fade; returns whether one was running
    pub(crate) fn cancel(&self) -> bool {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        match current.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Release the slot if `token` still owns it
    pub(crate) fn finish(&self, token: &CancelToken) -> bool {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        match current.as_ref() {
            Some(owner) if owner.same(token) && !token.is_cancelled() => {
                *current = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_fade_cancels_previous() {
        let slot = FadeSlot::default();
        let first = slot.begin();
        let second = slot.begin();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(!slot.finish(&first));
        assert!(slot.finish(&second));
        assert!(!slot.is_active());
    }

    #[test]
    fn test_cancel_clears_slot() {
        let slot = FadeSlot::default();
        assert!(!slot.cancel());
        let token = slot.begin();
        assert!(slot.is_active());
        assert!(slot.cancel());
        assert!(token.is_cancelled());
        assert!(!slot.finish(&token));
    }
}
