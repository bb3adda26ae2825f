//! Scheduler state.
//!
//! `ValidationState` is the single mutable record behind a
//! [`ValidationScheduler`](crate::ValidationScheduler). It is only mutated by
//! the check routine's admission and release steps and by the public control
//! methods, always under the scheduler's mutex.

use std::time::Duration;

use tokio::time::Instant;

/// Lifecycle phase of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerPhase {
    /// Not monitoring; the initial and terminal phase
    #[default]
    Stopped,
    /// Timer and trigger listeners are live
    Running,
}

/// Mutable scheduler state.
#[derive(Debug, Clone)]
pub struct ValidationState {
    /// Running or stopped
    pub phase: SchedulerPhase,
    /// True only while a check is in flight
    pub is_validating: bool,
    /// Start time of the most recent check
    pub last_validation_at: Option<Instant>,
    /// Time of the most recent user-interaction event
    pub last_activity_at: Option<Instant>,
    /// Focus and visibility triggers are honored only while set
    pub focus_checks_enabled: bool,
    /// Next periodic tick, while the timer task is alive
    pub next_tick_at: Option<Instant>,
    /// Bumped on every stop; ties in-flight checks to the run that admitted them
    pub epoch: u64,
}

impl Default for ValidationState {
    fn default() -> Self {
        Self {
            phase: SchedulerPhase::Stopped,
            is_validating: false,
            last_validation_at: None,
            last_activity_at: None,
            focus_checks_enabled: true,
            next_tick_at: None,
            epoch: 0,
        }
    }
}

impl ValidationState {
    /// Returns true while the scheduler is running.
    pub fn is_running(&self) -> bool {
        self.phase == SchedulerPhase::Running
    }

    /// Time elapsed since the last check started, if any check has run.
    pub fn since_last_validation(&self, now: Instant) -> Option<Duration> {
        self.last_validation_at
            .map(|at| now.saturating_duration_since(at))
    }

    /// Resets every field to its construction-time default while keeping the
    /// epoch monotonic, so stale in-flight checks stay recognisable.
    pub fn reset(&mut self) {
        let epoch = self.epoch;
        *self = Self::default();
        self.epoch = epoch;
    }
}

/// Diagnostic snapshot of a scheduler. Not meant for control flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerStatus {
    /// Scheduler is running
    pub is_running: bool,
    /// A check is in flight
    pub is_validating: bool,
    /// Start time of the most recent check
    pub last_validation_at: Option<Instant>,
    /// Time until the next periodic check
    pub next_check_in: Option<Duration>,
    /// Running, idle, and the periodic timer is alive
    pub is_healthy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_stopped_and_idle() {
        let state = ValidationState::default();
        assert_eq!(state.phase, SchedulerPhase::Stopped);
        assert!(!state.is_running());
        assert!(!state.is_validating);
        assert!(state.focus_checks_enabled);
        assert!(state.last_validation_at.is_none());
    }

    #[test]
    fn reset_keeps_epoch() {
        let mut state = ValidationState {
            phase: SchedulerPhase::Running,
            is_validating: true,
            focus_checks_enabled: false,
            epoch: 7,
            ..ValidationState::default()
        };
        state.reset();
        assert_eq!(state.epoch, 7);
        assert!(!state.is_running());
        assert!(!state.is_validating);
        assert!(state.focus_checks_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn since_last_validation_measures_from_start() {
        let mut state = ValidationState::default();
        assert!(state.since_last_validation(Instant::now()).is_none());

        state.last_validation_at = Some(Instant::now());
        tokio::time::advance(Duration::from_secs(12)).await;
        assert_eq!(
            state.since_last_validation(Instant::now()),
            Some(Duration::from_secs(12))
        );
    }
}
