//! Write-once cell backing the `$` placeholder.

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use serde_json::Value;

use crate::context::{Context, Wake};
use crate::errors::{ContextError, DeferredError, QueryError};
use crate::query::Extractor;

/// Reserved name of the deferred slot.
pub const DOLLAR: &str = "$";

/// Named read-only variables plus a single `$` slot that is set exactly
/// once, possibly after readers have started waiting on it.
///
/// Reads of `$` block until [`DeferredContext::set`] succeeds or the
/// governing [`Context`] is cancelled or expires. Clones share the slot.
#[derive(Clone)]
pub struct DeferredContext {
    inner: Arc<Inner>,
}

struct Inner {
    ctx: Context,
    vars: BTreeMap<String, String>,
    slot: Arc<Slot>,
}

struct Slot {
    value: Mutex<Option<Value>>,
    ready: Condvar,
}

impl Slot {
    fn lock(&self) -> MutexGuard<'_, Option<Value>> {
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Wake for Slot {
    fn wake(&self) {
        // taking the lock orders the wakeup after any in-flight check
        let _guard = self.lock();
        self.ready.notify_all();
    }
}

impl DeferredContext {
    pub fn new(ctx: &Context, vars: BTreeMap<String, String>) -> Self {
        let slot = Arc::new(Slot {
            value: Mutex::new(None),
            ready: Condvar::new(),
        });
        let waker: Weak<dyn Wake> = Arc::downgrade(&slot) as Weak<dyn Wake>;
        ctx.subscribe(waker);
        Self {
            inner: Arc::new(Inner {
                ctx: ctx.clone(),
                vars,
                slot,
            }),
        }
    }

    /// Assigns `$`. Only the first call succeeds; later calls leave the
    /// stored value untouched.
    pub fn set(&self, value: Value) -> Result<(), DeferredError> {
        let mut slot = self.inner.slot.lock();
        if slot.is_some() {
            return Err(DeferredError::AlreadySet);
        }
        *slot = Some(value);
        self.inner.slot.ready.notify_all();
        tracing::debug!("deferred value set");
        Ok(())
    }

    pub fn is_set(&self) -> bool {
        self.inner.slot.lock().is_some()
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.inner.vars.get(name).map(String::as_str)
    }

    pub fn context(&self) -> &Context {
        &self.inner.ctx
    }

    /// Blocks until `$` is set, then returns a copy of it.
    pub fn wait(&self) -> Result<Value, DeferredError> {
        let slot = &self.inner.slot;
        let mut value = slot.lock();
        loop {
            if let Some(v) = value.as_ref() {
                return Ok(v.clone());
            }
            self.inner.ctx.check()?;
            tracing::trace!("waiting for deferred value");
            value = match self.inner.ctx.deadline() {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ContextError::DeadlineExceeded.into());
                    }
                    slot.ready
                        .wait_timeout(value, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|e| e.into_inner().0)
                }
                None => slot
                    .ready
                    .wait(value)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }
}

impl Extractor for DeferredContext {
    fn extract_key(&self, key: &str) -> Result<Value, QueryError> {
        if key == DOLLAR {
            return Ok(self.wait()?);
        }
        self.var(key)
            .map(|v| Value::String(v.to_string()))
            .ok_or_else(|| QueryError::NotFound {
                segment: crate::query::Segment::Key(key.to_string()).to_string(),
            })
    }
}

impl std::fmt::Debug for DeferredContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredContext")
            .field("vars", &self.inner.vars)
            .field("set", &self.is_set())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn set_once() {
        let cell = DeferredContext::new(&Context::background(), BTreeMap::new());
        assert!(!cell.is_set());
        cell.set(json!(1)).unwrap();
        assert_eq!(cell.set(json!(2)), Err(DeferredError::AlreadySet));
        assert_eq!(cell.wait().unwrap(), json!(1));
    }

    #[test]
    fn value_wins_over_expired_context() {
        let ctx = Context::background().with_deadline(Instant::now());
        let cell = DeferredContext::new(&ctx, BTreeMap::new());
        cell.set(json!("late")).unwrap();
        assert_eq!(cell.wait().unwrap(), json!("late"));
    }

    #[test]
    fn cancel_wakes_blocked_reader() {
        let ctx = Context::background().with_cancel();
        let cell = DeferredContext::new(&ctx, BTreeMap::new());
        std::thread::scope(|s| {
            let reader = s.spawn(|| cell.wait());
            std::thread::sleep(Duration::from_millis(20));
            ctx.cancel();
            assert_eq!(
                reader.join().unwrap(),
                Err(DeferredError::Context(ContextError::Cancelled))
            );
        });
    }

    #[test]
    fn unknown_variable_is_not_found() {
        let cell = DeferredContext::new(&Context::background(), BTreeMap::new());
        let err = cell.extract_key("nope").unwrap_err();
        assert_eq!(err.to_string(), r#"".nope" not found"#);
    }
}
