//! The `on_access_lost` contract.
//!
//! Push and pull strategies both deliver access loss through the same
//! [`AccessLostSignal`]. The handler is zero-argument: callers read the
//! "why" from their own last-known state, since the two strategies do not
//! share a payload shape.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;

type Handler = Box<dyn FnOnce() + Send + 'static>;

/// A once-only access-loss handler shared between notification strategies.
///
/// Clones share the same slot, so whichever strategy fires first consumes the
/// handler and every later `fire` is a no-op. A panicking handler is caught
/// and logged.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use sirius_access::AccessLostSignal;
///
/// let fired = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&fired);
/// let signal = AccessLostSignal::new(move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// assert!(signal.fire());
/// assert!(!signal.clone().fire());
/// assert_eq!(fired.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone)]
pub struct AccessLostSignal {
    slot: Arc<Mutex<Option<Handler>>>,
}

impl AccessLostSignal {
    /// Arms a signal with `handler`.
    pub fn new(handler: impl FnOnce() + Send + 'static) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(Box::new(handler)))),
        }
    }

    /// Invokes the handler if it has not been consumed or disarmed.
    ///
    /// Returns true when a handler ran (even if it panicked).
    pub fn fire(&self) -> bool {
        // Take under the lock, call outside it: the handler may stop the
        // channel that holds this signal.
        let handler = self.slot.lock().take();
        let Some(handler) = handler else {
            return false;
        };
        if catch_unwind(AssertUnwindSafe(handler)).is_err() {
            tracing::error!("access-lost handler panicked; panic contained");
        }
        true
    }

    /// Drops the handler without invoking it.
    ///
    /// Returns true when an armed handler was discarded.
    pub fn disarm(&self) -> bool {
        self.slot.lock().take().is_some()
    }

    /// Whether a handler is still waiting to fire.
    pub fn is_armed(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl fmt::Debug for AccessLostSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessLostSignal")
            .field("armed", &self.is_armed())
            .finish()
    }
}
