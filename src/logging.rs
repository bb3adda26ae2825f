use std::fmt;

use crate::trigger::Trigger;

/// Check-scoped structured logger.
///
/// Every message from one revalidation carries the same `principal_id` and
/// `trigger` fields, so a single check can be followed through the log.
#[derive(Debug, Clone, Copy)]
pub struct CheckLog<'a> {
    principal_id: &'a str,
    trigger: Trigger,
}

impl<'a> CheckLog<'a> {
    /// Creates a logger for one check.
    ///
    /// `principal_id` is `"-"` before a session is known.
    pub(crate) fn new(principal_id: &'a str, trigger: Trigger) -> Self {
        Self {
            principal_id,
            trigger,
        }
    }

    /// Returns the principal this check is about.
    pub fn principal_id(&self) -> &str {
        self.principal_id
    }

    /// Returns what requested the check.
    pub fn trigger(&self) -> Trigger {
        self.trigger
    }

    /// Logs an info-level message.
    pub fn info(&self, args: fmt::Arguments<'_>) {
        tracing::info!(principal_id = %self.principal_id, trigger = %self.trigger, "{}", args);
    }

    /// Logs a warning-level message.
    pub fn warn(&self, args: fmt::Arguments<'_>) {
        tracing::warn!(principal_id = %self.principal_id, trigger = %self.trigger, "{}", args);
    }

    /// Logs an error-level message.
    pub fn error(&self, args: fmt::Arguments<'_>) {
        tracing::error!(principal_id = %self.principal_id, trigger = %self.trigger, "{}", args);
    }

    /// Logs a debug-level message.
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        tracing::debug!(principal_id = %self.principal_id, trigger = %self.trigger, "{}", args);
    }
}
