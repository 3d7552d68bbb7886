//! Unsubscribe tokens.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

type Action = Box<dyn FnOnce() + Send>;

/// Reverses exactly one subscription (or one composite registration).
///
/// Invoking the token runs its action at most once; later invocations are
/// no-ops. Clones share the same action, so the token can be handed to a
/// handler that unsubscribes itself mid-dispatch. The internal lock is held
/// only while taking the action, never while running it.
#[derive(Clone)]
pub struct UnsubscribeToken {
    action: Arc<Mutex<Option<Action>>>,
}

impl UnsubscribeToken {
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Arc::new(Mutex::new(Some(Box::new(action)))),
        }
    }

    /// A token that does nothing.
    #[must_use]
    pub fn noop() -> Self {
        Self {
            action: Arc::new(Mutex::new(None)),
        }
    }

    /// Runs the action if it has not run yet. Returns `true` if this call
    /// performed the unsubscription.
    pub fn unsubscribe(&self) -> bool {
        let action = self.action.lock().take();
        match action {
            Some(action) => {
                action();
                true
            }
            None => false,
        }
    }

    /// Returns `true` until the token has been invoked.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.action.lock().is_some()
    }
}

impl fmt::Debug for UnsubscribeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnsubscribeToken")
            .field("active", &self.is_active())
            .finish()
    }
}
