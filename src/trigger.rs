//! Trigger sources for revalidation.
//!
//! The host (a desktop shell, a web bridge, a test) publishes focus,
//! visibility and activity events on a [`TriggerBus`]. A running scheduler
//! holds one subscription and drops it on stop, which is the whole of
//! "detaching listeners".

use std::fmt;

use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 64;

/// Why a check was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Periodic timer tick
    Periodic,
    /// Window regained focus
    Focus,
    /// Document became visible
    Visibility,
    /// User interaction after an idle period
    Activity,
    /// Explicit `validate_now`
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Periodic => write!(f, "periodic"),
            Trigger::Focus => write!(f, "focus"),
            Trigger::Visibility => write!(f, "visibility"),
            Trigger::Activity => write!(f, "activity"),
            Trigger::Manual => write!(f, "manual"),
        }
    }
}

/// User-interaction kinds that count as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    /// Pointer button pressed
    PointerDown,
    /// Pointer moved
    PointerMove,
    /// Key pressed
    KeyPress,
    /// Content scrolled
    Scroll,
    /// Touch started
    TouchStart,
    /// Click
    Click,
}

/// A host event that may trigger a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEvent {
    /// Window regained foreground focus
    Focus,
    /// Visibility changed; `visible` is the new state
    Visibility {
        /// Whether the document is now visible
        visible: bool,
    },
    /// User interaction
    Activity(ActivityKind),
}

/// Broadcast bus carrying host events to the scheduler.
///
/// Cloning yields another handle on the same bus.
#[derive(Debug, Clone)]
pub struct TriggerBus {
    tx: broadcast::Sender<TriggerEvent>,
}

impl TriggerBus {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publishes an event. Returns the number of live subscribers.
    ///
    /// Publishing with nobody listening is not an error; the event is dropped.
    pub fn publish(&self, event: TriggerEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribes to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<TriggerEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for TriggerBus {
    fn default() -> Self {
        Self::new()
    }
}
