//! Cooperative stop flag shared between the binary's interrupt handler and
//! the running role loop.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type AbandonHook = Box<dyn FnOnce() + Send>;

/// Cloneable stop request. Loops check it between cycles and on every poll.
///
/// When a session cannot drain in time the supervisor calls
/// [`Shutdown::abandon`], which runs the hooks registered for resources that
/// would otherwise outlive the process, such as an external player.
#[derive(Clone, Default)]
pub struct Shutdown {
    requested: Arc<AtomicBool>,
    abandon_hooks: Arc<Mutex<Vec<AbandonHook>>>,
}

impl Shutdown {
    /// Create an untriggered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to drain and exit.
    pub fn trigger(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested.
    pub fn is_triggered(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Register cleanup to run if the session is abandoned.
    pub fn on_abandon(&self, hook: impl FnOnce() + Send + 'static) {
        self.hooks().push(Box::new(hook));
    }

    /// Give up on the session: trigger the flag and run every registered
    /// hook once.
    pub fn abandon(&self) {
        self.trigger();
        let hooks = std::mem::take(&mut *self.hooks());
        for hook in hooks {
            hook();
        }
    }

    fn hooks(&self) -> std::sync::MutexGuard<'_, Vec<AbandonHook>> {
        self.abandon_hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shutdown")
            .field("requested", &self.is_triggered())
            .field("abandon_hooks", &self.hooks().len())
            .finish()
    }
}
