//! Cooperative cancellation for fill work.
//!
//! Cancellation never interrupts a computation. Fill work checks the token at
//! its suspension points and unwinds with [`FillError::Aborted`] once the
//! token is cancelled.
//!
//! [`FillError::Aborted`]: crate::FillError::Aborted

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

type CancelHook = Box<dyn Fn() + Send + Sync>;

/// Identifies a hook registered with [`CancellationToken::on_cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CancelHookId(u64);

/// A cancellation token shared between a fill and whoever may abort it.
///
/// Clones share the same state.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<CancellationState>,
}

struct CancellationState {
    cancelled: AtomicBool,
    next_hook: AtomicU64,
    hooks: Mutex<Vec<(CancelHookId, CancelHook)>>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellationState {
                cancelled: AtomicBool::new(false),
                next_hook: AtomicU64::new(0),
                hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Check if cancellation has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation.
    ///
    /// Hooks registered with [`on_cancel`](Self::on_cancel) run once, on the
    /// first call.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::AcqRel) {
            let hooks = self.inner.hooks.lock();
            for (_, hook) in hooks.iter() {
                hook();
            }
        }
    }

    /// Reset the token to the non-cancelled state so it can be reused.
    pub fn reset(&self) {
        self.inner.cancelled.store(false, Ordering::Release);
    }

    /// Register a hook to run when the token is cancelled.
    ///
    /// If the token is already cancelled the hook runs immediately and is not
    /// kept. Owners that outlive their interest in the token release the hook
    /// with [`remove_hook`](Self::remove_hook).
    pub fn on_cancel<F>(&self, hook: F) -> CancelHookId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = CancelHookId(self.inner.next_hook.fetch_add(1, Ordering::Relaxed));
        let mut hooks = self.inner.hooks.lock();
        if self.is_cancelled() {
            drop(hooks);
            hook();
        } else {
            hooks.push((id, Box::new(hook)));
        }
        id
    }

    /// Remove a hook. Returns whether it was still registered.
    pub fn remove_hook(&self, id: CancelHookId) -> bool {
        let mut hooks = self.inner.hooks.lock();
        let before = hooks.len();
        hooks.retain(|(hook_id, _)| *hook_id != id);
        hooks.len() != before
    }

    /// Number of registered hooks.
    pub fn hook_count(&self) -> usize {
        self.inner.hooks.lock().len()
    }

    /// Whether two tokens share the same state.
    pub fn same_token(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
