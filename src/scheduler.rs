//! Pull-based access revalidation.
//!
//! A [`ValidationScheduler`] periodically, and on focus, visibility and
//! activity-after-idle events, re-fetches the principal's groups and fires
//! the access-lost signal when an explicit denial comes back.
//!
//! # Check routine
//!
//! Every trigger funnels into one routine:
//!
//! ```text
//! admit (sync) ──► session? ──► fetch groups ──► evaluate ──► granted: log
//!   │                │               │                         denied: fire signal, stop
//!   skip if in       none: log       error: log, keep running
//!   flight/stopped
//! ```
//!
//! Admission sets the in-flight flag and the last-check timestamp before the
//! first suspension point. A drop guard clears the flag on every exit path,
//! including errors and cancellation. Triggers that arrive while a check is
//! in flight are dropped, never queued.
//!
//! Transport failures are fail-open: they are logged and the next trigger
//! retries. Only a successfully fetched denial ends the session.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::ValidationConfig;
use crate::error::FetchError;
use crate::fetch::{GroupFetcher, SessionProvider, TimeoutFetcher};
use crate::logging::CheckLog;
use crate::policy::{AccessDecision, RequiredAccessDescriptor, evaluate};
use crate::signal::AccessLostSignal;
use crate::state::{SchedulerPhase, SchedulerStatus, ValidationState};
use crate::trigger::{Trigger, TriggerBus, TriggerEvent};

/// Why a trigger did not produce a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another check is in flight
    InFlight,
    /// The scheduler is stopped and the trigger was not manual
    Stopped,
}

/// Result of one pass through the check routine.
#[derive(Debug)]
pub enum CheckOutcome {
    /// Groups fetched and access still granted
    Granted(AccessDecision),
    /// Groups fetched and access denied
    Denied(AccessDecision),
    /// No transport-level session; nothing to validate yet
    NoSession,
    /// The fetch failed; treated as a transient condition
    Failed(FetchError),
    /// The check never started
    Skipped(SkipReason),
}

impl CheckOutcome {
    /// True when the routine ran to completion without a transport error.
    pub fn is_completed(&self) -> bool {
        matches!(
            self,
            CheckOutcome::Granted(_) | CheckOutcome::Denied(_) | CheckOutcome::NoSession
        )
    }
}

struct Shared {
    state: ValidationState,
    signal: Option<AccessLostSignal>,
    timer: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
}

struct Inner {
    config: ValidationConfig,
    descriptor: RequiredAccessDescriptor,
    sessions: Arc<dyn SessionProvider>,
    fetcher: Arc<dyn GroupFetcher>,
    triggers: TriggerBus,
    shared: Mutex<Shared>,
}

/// Continuous access revalidation for one signed-in session.
///
/// Cloning yields another handle on the same scheduler. The owning session
/// layer constructs one per sign-in and calls [`cleanup`](Self::cleanup) at
/// the end of the session.
#[derive(Clone)]
pub struct ValidationScheduler {
    inner: Arc<Inner>,
}

impl fmt::Debug for ValidationScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationScheduler")
            .field("status", &self.status())
            .finish()
    }
}

impl ValidationScheduler {
    /// Creates a stopped scheduler.
    ///
    /// `fetcher` is wrapped in a [`TimeoutFetcher`] bounded by
    /// `config.fetch_timeout`.
    pub fn new(
        config: ValidationConfig,
        descriptor: RequiredAccessDescriptor,
        sessions: Arc<dyn SessionProvider>,
        fetcher: Arc<dyn GroupFetcher>,
        triggers: TriggerBus,
    ) -> Self {
        let fetcher: Arc<dyn GroupFetcher> =
            Arc::new(TimeoutFetcher::new(fetcher, config.fetch_timeout));
        Self {
            inner: Arc::new(Inner {
                config,
                descriptor,
                sessions,
                fetcher,
                triggers,
                shared: Mutex::new(Shared {
                    state: ValidationState::default(),
                    signal: None,
                    timer: None,
                    listener: None,
                }),
            }),
        }
    }

    /// Starts the periodic timer and trigger listeners.
    ///
    /// Returns false, leaving the running instance untouched, when already
    /// running or when called outside a Tokio runtime.
    pub fn initialize(&self, on_access_lost: AccessLostSignal) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!("access validation needs a Tokio runtime; not started");
            return false;
        };

        let config = &self.inner.config;
        let mut shared = self.inner.shared.lock();
        if shared.state.is_running() {
            tracing::warn!("access validation already running; ignoring initialize");
            return false;
        }

        let now = Instant::now();
        shared.state.phase = SchedulerPhase::Running;
        shared.state.last_activity_at = Some(now);
        shared.state.next_tick_at = Some(now + config.check_interval);
        shared.signal = Some(on_access_lost);

        let weak = Arc::downgrade(&self.inner);
        shared.timer = Some(runtime.spawn(run_timer(weak.clone(), config.check_interval)));

        if config.focus_checks || config.activity_checks {
            // Subscribe before returning so events published right after
            // initialize are not missed.
            let rx = self.inner.triggers.subscribe();
            shared.listener = Some(runtime.spawn(run_listener(weak, rx)));
        }

        tracing::info!(
            check_interval = ?config.check_interval,
            focus_checks = config.focus_checks,
            activity_checks = config.activity_checks,
            "access validation started"
        );
        true
    }

    /// Stops the timer and detaches listeners. Idempotent.
    ///
    /// A check already in flight is not cancelled, but its result is
    /// discarded.
    pub fn stop(&self) {
        if self.inner.stop_running(None) {
            tracing::info!("access validation stopped");
        }
    }

    /// Stops, discards the access-lost handler and resets all state.
    ///
    /// The scheduler can be initialized again afterwards.
    pub fn cleanup(&self) {
        self.stop();
        let mut shared = self.inner.shared.lock();
        shared.signal = None;
        shared.state.reset();
        // Detach checks admitted while stopped, too.
        shared.state.epoch += 1;
        tracing::debug!("access validation state cleared");
    }

    /// Runs one check now, bypassing throttles.
    ///
    /// Admission happens on call, before the returned future is polled, so
    /// two back-to-back calls produce a single fetch. Resolves to true when
    /// the check ran to completion without a transport error; whether access
    /// was granted is reported through the access-lost signal.
    pub fn validate_now(&self) -> impl Future<Output = bool> + Send + 'static {
        let check = self.check_now();
        async move { check.await.is_completed() }
    }

    /// Like [`validate_now`](Self::validate_now), resolving to the detailed outcome.
    pub fn check_now(&self) -> impl Future<Output = CheckOutcome> + Send + 'static {
        let admitted = Inner::admit(&self.inner, Trigger::Manual);
        async move {
            match admitted {
                Ok(ticket) => ticket.run().await,
                Err(reason) => {
                    tracing::debug!(?reason, "manual access check skipped");
                    CheckOutcome::Skipped(reason)
                }
            }
        }
    }

    /// Enables or suppresses focus and visibility triggers without stopping.
    pub fn set_focus_checks_enabled(&self, enabled: bool) {
        self.inner.shared.lock().state.focus_checks_enabled = enabled;
        tracing::debug!(enabled, "focus-triggered access checks toggled");
    }

    /// Whether the scheduler is running.
    pub fn is_running(&self) -> bool {
        self.inner.shared.lock().state.is_running()
    }

    /// Diagnostic snapshot.
    pub fn status(&self) -> SchedulerStatus {
        let shared = self.inner.shared.lock();
        let state = &shared.state;
        let now = Instant::now();
        let timer_alive = shared.timer.as_ref().is_some_and(|t| !t.is_finished());
        SchedulerStatus {
            is_running: state.is_running(),
            is_validating: state.is_validating,
            last_validation_at: state.last_validation_at,
            next_check_in: state
                .next_tick_at
                .filter(|_| state.is_running())
                .map(|at| at.saturating_duration_since(now)),
            is_healthy: state.is_running() && !state.is_validating && timer_alive,
        }
    }
}

impl Inner {
    /// Synchronous admission: steps 1-3 of the check routine.
    fn admit(this: &Arc<Self>, trigger: Trigger) -> Result<CheckTicket, SkipReason> {
        let mut shared = this.shared.lock();
        let state = &mut shared.state;
        if state.is_validating {
            return Err(SkipReason::InFlight);
        }
        if !state.is_running() && trigger != Trigger::Manual {
            return Err(SkipReason::Stopped);
        }
        state.is_validating = true;
        state.last_validation_at = Some(Instant::now());
        Ok(CheckTicket {
            inner: Arc::clone(this),
            epoch: state.epoch,
            trigger,
        })
    }

    /// Admits and spawns a check for a timer or host trigger.
    fn dispatch(this: &Arc<Self>, trigger: Trigger) {
        match Self::admit(this, trigger) {
            Ok(ticket) => {
                tokio::spawn(async move {
                    ticket.run().await;
                });
            }
            Err(reason) => tracing::debug!(%trigger, ?reason, "access check skipped"),
        }
    }

    /// Applies trigger policy to a host event.
    fn on_event(this: &Arc<Self>, event: TriggerEvent) {
        let now = Instant::now();
        let config = &this.config;
        let trigger = {
            let mut shared = this.shared.lock();
            let state = &mut shared.state;
            if !state.is_running() {
                return;
            }
            match event {
                TriggerEvent::Visibility { visible: false } => return,
                TriggerEvent::Focus | TriggerEvent::Visibility { visible: true } => {
                    if !config.focus_checks || !state.focus_checks_enabled {
                        return;
                    }
                    if within(state.since_last_validation(now), config.min_focus_interval) {
                        tracing::trace!(?event, "focus check throttled");
                        return;
                    }
                    if event == TriggerEvent::Focus {
                        Trigger::Focus
                    } else {
                        Trigger::Visibility
                    }
                }
                TriggerEvent::Activity(kind) => {
                    let previous = state.last_activity_at.replace(now);
                    if !config.activity_checks {
                        return;
                    }
                    let was_idle = previous
                        .is_some_and(|p| now.saturating_duration_since(p) > config.idle_threshold);
                    if !was_idle {
                        return;
                    }
                    if within(state.since_last_validation(now), config.min_activity_interval) {
                        tracing::trace!(?kind, "activity check throttled");
                        return;
                    }
                    tracing::debug!(?kind, "user active after idle period");
                    Trigger::Activity
                }
            }
        };
        Self::dispatch(this, trigger);
    }

    /// Stops the scheduler if running and, when `epoch` is given, only if it
    /// is still current. Returns true when this call performed the stop.
    fn stop_running(&self, epoch: Option<u64>) -> bool {
        let (timer, listener) = {
            let mut shared = self.shared.lock();
            if !shared.state.is_running() {
                return false;
            }
            if epoch.is_some_and(|e| e != shared.state.epoch) {
                return false;
            }
            shared.state.phase = SchedulerPhase::Stopped;
            shared.state.is_validating = false;
            shared.state.next_tick_at = None;
            shared.state.epoch += 1;
            (shared.timer.take(), shared.listener.take())
        };
        for task in [timer, listener].into_iter().flatten() {
            task.abort();
        }
        true
    }

    /// The handler to fire for a denial observed by a check from `epoch`.
    fn signal_for(&self, epoch: u64) -> Option<AccessLostSignal> {
        let shared = self.shared.lock();
        if shared.state.epoch != epoch {
            return None;
        }
        shared.signal.clone()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let shared = self.shared.get_mut();
        for task in [shared.timer.take(), shared.listener.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}

fn within(elapsed: Option<Duration>, bound: Duration) -> bool {
    elapsed.is_some_and(|e| e < bound)
}

/// Proof of admission. Dropping it releases the in-flight flag.
struct CheckTicket {
    inner: Arc<Inner>,
    epoch: u64,
    trigger: Trigger,
}

impl CheckTicket {
    /// Steps 4-9 of the check routine. Step 10 is `Drop`.
    async fn run(self) -> CheckOutcome {
        let inner = Arc::clone(&self.inner);

        let bound = inner.config.fetch_timeout;
        let active =
            match tokio::time::timeout(bound, inner.sessions.has_active_session()).await {
                Ok(active) => active,
                Err(_) => {
                    CheckLog::new("-", self.trigger).warn(format_args!(
                        "session lookup timed out after {bound:?}, access unchanged"
                    ));
                    return CheckOutcome::Failed(FetchError::Timeout(bound));
                }
            };
        if !active {
            CheckLog::new("-", self.trigger)
                .info(format_args!("no active portal session; nothing to validate"));
            return CheckOutcome::NoSession;
        }
        let Some(principal_id) = inner.sessions.current_principal_id() else {
            CheckLog::new("-", self.trigger)
                .info(format_args!("portal session has no principal yet; skipping"));
            return CheckOutcome::NoSession;
        };
        let log = CheckLog::new(&principal_id, self.trigger);
        log.debug(format_args!("revalidating group membership"));

        let groups = match inner.fetcher.fetch_groups(&principal_id).await {
            Ok(groups) => groups,
            Err(err) => {
                log.warn(format_args!(
                    "group fetch failed ({}), access unchanged: {}",
                    err.kind(),
                    err
                ));
                return CheckOutcome::Failed(err);
            }
        };

        let decision = evaluate(&groups.group_ids, &groups.group_names, &inner.descriptor);
        if decision.granted {
            log.debug(format_args!(
                "access confirmed (group id: {:?}, group name: {:?})",
                decision.matched_group_id, decision.matched_group_name
            ));
            return CheckOutcome::Granted(decision);
        }

        log.warn(format_args!(
            "required group '{}' no longer held; access revoked",
            inner.descriptor.required_group_id
        ));
        match inner.signal_for(self.epoch) {
            Some(signal) => {
                if !signal.fire() {
                    log.debug(format_args!("access-lost signal already consumed"));
                }
            }
            None => log.info(format_args!(
                "scheduler stopped or cleared during check; denial not propagated"
            )),
        }
        if inner.stop_running(Some(self.epoch)) {
            log.info(format_args!("access validation stopped after denial"));
        }
        CheckOutcome::Denied(decision)
    }
}

impl Drop for CheckTicket {
    fn drop(&mut self) {
        let mut shared = self.inner.shared.lock();
        if shared.state.epoch == self.epoch {
            shared.state.is_validating = false;
        }
    }
}

async fn run_timer(inner: Weak<Inner>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.shared.lock().state.next_tick_at = Some(Instant::now() + period);
        Inner::dispatch(&inner, Trigger::Periodic);
    }
}

async fn run_listener(inner: Weak<Inner>, mut rx: broadcast::Receiver<TriggerEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                Inner::on_event(&inner, event);
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "trigger listener lagged; events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
