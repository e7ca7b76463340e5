//! Cancellation and deadline context governing blocking reads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use crate::errors::ContextError;

/// Something parked on a condition variable that must be woken when a
/// context it depends on is cancelled.
pub(crate) trait Wake: Send + Sync {
    fn wake(&self);
}

/// A cloneable cancellation handle with an optional deadline.
///
/// Children created with [`Context::with_cancel`] or
/// [`Context::with_timeout`] are cancelled together with their parent, and
/// never outlive its deadline.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    parent: Option<Context>,
    deadline: Option<Instant>,
    cancelled: AtomicBool,
    wakers: Mutex<Vec<Weak<dyn Wake>>>,
}

impl Context {
    /// A root context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::new(None, None)
    }

    fn new(parent: Option<Context>, deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(Inner {
                parent,
                deadline,
                cancelled: AtomicBool::new(false),
                wakers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn with_cancel(&self) -> Self {
        Self::new(Some(self.clone()), self.deadline())
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline() {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Self::new(Some(self.clone()), Some(deadline))
    }

    /// Cancels this context and every context derived from it. Idempotent.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::trace!("context cancelled");
        let wakers = std::mem::take(&mut *self.lock_wakers());
        for waker in wakers.iter().filter_map(Weak::upgrade) {
            waker.wake();
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        let mut ctx = Some(self);
        while let Some(c) = ctx {
            if c.inner.cancelled.load(Ordering::SeqCst) {
                return true;
            }
            ctx = c.inner.parent.as_ref();
        }
        false
    }

    /// `Ok` while the context is live.
    pub fn check(&self) -> Result<(), ContextError> {
        if self.is_cancelled() {
            return Err(ContextError::Cancelled);
        }
        match self.deadline() {
            Some(deadline) if Instant::now() >= deadline => Err(ContextError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Registers `waker` with this context and all of its ancestors, since a
    /// cancel anywhere up the chain ends the wait.
    pub(crate) fn subscribe(&self, waker: Weak<dyn Wake>) {
        let mut ctx = Some(self);
        while let Some(c) = ctx {
            let mut wakers = c.lock_wakers();
            wakers.retain(|w| w.strong_count() > 0);
            wakers.push(waker.clone());
            drop(wakers);
            ctx = c.inner.parent.as_ref();
        }
    }

    fn lock_wakers(&self) -> std::sync::MutexGuard<'_, Vec<Weak<dyn Wake>>> {
        self.inner
            .wakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.deadline())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
