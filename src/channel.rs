//! Notification channels: how "access possibly changed" reaches the session.
//!
//! Two strategies sit behind [`NotificationChannel`], chosen once per
//! session by [`build_channel`]:
//!
//! - [`PullChannel`]: the [`ValidationScheduler`] polling on timers and host
//!   events.
//! - [`PushChannel`]: a server-initiated membership event stream. Removal
//!   from the required group fires the access-lost signal immediately. When
//!   the stream cannot be kept up, the channel falls back to pull rather than
//!   leaving the user unmonitored.
//!
//! Both fire the same [`AccessLostSignal`].

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::config::{AccessConfig, ChannelConfig, ChannelMode};
use crate::error::ChannelError;
use crate::fetch::{GroupFetcher, SessionProvider};
use crate::policy::RequiredAccessDescriptor;
use crate::scheduler::ValidationScheduler;
use crate::signal::AccessLostSignal;
use crate::trigger::TriggerBus;

/// Common contract of the push and pull strategies.
pub trait NotificationChannel: Send + Sync {
    /// Which strategy this is.
    fn mode(&self) -> ChannelMode;

    /// Starts monitoring. `on_access_lost` fires at most once.
    ///
    /// # Errors
    ///
    /// Returns a [`ChannelError`] when monitoring cannot begin at all.
    fn start(&self, on_access_lost: AccessLostSignal) -> Result<(), ChannelError>;

    /// Stops all monitoring activity and drops the signal. Idempotent.
    fn stop(&self);

    /// Whether anything is still watching this session.
    fn is_active(&self) -> bool;
}

/// Everything a channel needs from the host.
#[derive(Clone)]
pub struct Collaborators {
    /// Transport-level session
    pub sessions: Arc<dyn SessionProvider>,
    /// Group membership source
    pub fetcher: Arc<dyn GroupFetcher>,
    /// Host focus/visibility/activity events
    pub triggers: TriggerBus,
    /// Membership event stream, when the deployment has one
    pub events: Option<Arc<dyn MembershipEventStream>>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("push_available", &self.events.is_some())
            .finish_non_exhaustive()
    }
}

/// Invoked when the principal is added to the required group.
pub type RefreshHook = Arc<dyn Fn() + Send + Sync>;

/// Builds the channel selected by `config.channel.mode`.
///
/// Push mode without an event stream degrades to pull with a warning.
pub fn build_channel(
    config: &AccessConfig,
    deps: &Collaborators,
    on_added: Option<RefreshHook>,
) -> Box<dyn NotificationChannel> {
    let scheduler = ValidationScheduler::new(
        config.validation.clone(),
        config.access.clone(),
        Arc::clone(&deps.sessions),
        Arc::clone(&deps.fetcher),
        deps.triggers.clone(),
    );

    match (config.channel.mode, &deps.events) {
        (ChannelMode::Push, Some(events)) => {
            let mut push = PushChannel::new(
                Arc::clone(events),
                Arc::clone(&deps.sessions),
                config.access.clone(),
                config.channel.clone(),
                scheduler,
            );
            if let Some(hook) = on_added {
                push = push.with_refresh_hook(hook);
            }
            Box::new(push)
        }
        (ChannelMode::Push, None) => {
            tracing::warn!("push channel configured but no event stream available; polling");
            Box::new(PullChannel::new(scheduler))
        }
        (ChannelMode::Pull, _) => Box::new(PullChannel::new(scheduler)),
    }
}

// ── Pull ─────────────────────────────────────────────────────────────

/// Pull strategy: a [`ValidationScheduler`] used standalone.
#[derive(Debug, Clone)]
pub struct PullChannel {
    scheduler: ValidationScheduler,
}

impl PullChannel {
    /// Wraps a stopped scheduler.
    pub fn new(scheduler: ValidationScheduler) -> Self {
        Self { scheduler }
    }

    /// The underlying scheduler, for diagnostics and manual checks.
    pub fn scheduler(&self) -> &ValidationScheduler {
        &self.scheduler
    }
}

impl NotificationChannel for PullChannel {
    fn mode(&self) -> ChannelMode {
        ChannelMode::Pull
    }

    fn start(&self, on_access_lost: AccessLostSignal) -> Result<(), ChannelError> {
        if !self.scheduler.initialize(on_access_lost) && !self.scheduler.is_running() {
            return Err(ChannelError::NoRuntime);
        }
        Ok(())
    }

    fn stop(&self) {
        self.scheduler.cleanup();
    }

    fn is_active(&self) -> bool {
        self.scheduler.is_running()
    }
}

// ── Push ─────────────────────────────────────────────────────────────

/// Direction of a membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipAction {
    /// Principal was added to the group
    Added,
    /// Principal was removed from the group
    Removed,
}

/// An event delivered on the membership stream.
///
/// Wire form is JSON tagged by `type`:
///
/// ```json
/// {"type": "group_membership_changed", "username": "amir", "groupId": "G1", "action": "removed"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MembershipEvent {
    /// Stream established
    Connected,
    /// Keep-alive
    Heartbeat,
    /// A principal's membership in a group changed
    GroupMembershipChanged {
        /// Principal whose membership changed
        username: String,
        /// Group that changed
        #[serde(rename = "groupId")]
        group_id: String,
        /// Added or removed
        action: MembershipAction,
    },
}

impl MembershipEvent {
    /// Decodes one event payload.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Malformed`] for unknown or invalid payloads.
    pub fn from_json(payload: &str) -> Result<Self, ChannelError> {
        serde_json::from_str(payload).map_err(|e| ChannelError::Malformed(e.to_string()))
    }
}

/// Opens membership event streams scoped to a principal.
#[async_trait]
pub trait MembershipEventStream: Send + Sync {
    /// Connects a stream for `principal_id`.
    async fn connect(&self, principal_id: &str)
    -> Result<Box<dyn EventSubscription>, ChannelError>;
}

/// An open membership event stream.
#[async_trait]
pub trait EventSubscription: Send {
    /// Next event, or `None` when the server closed the stream.
    ///
    /// A [`ChannelError::Malformed`] item skips one payload and keeps the
    /// stream open; any other error ends the connection.
    async fn next_event(&mut self) -> Option<Result<MembershipEvent, ChannelError>>;
}

/// Observable state of a [`PushChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushPhase {
    /// Never started
    Idle,
    /// Opening the stream
    Connecting,
    /// Stream open
    Connected,
    /// Waiting to retry after a failure
    Reconnecting {
        /// 1-based consecutive failure count
        attempt: u32,
    },
    /// Reconnects exhausted; pull scheduler is monitoring instead
    FallenBack,
    /// Stopped by the owner or after firing the signal
    Stopped,
}

struct PushState {
    phase: PushPhase,
    epoch: u64,
    signal: Option<AccessLostSignal>,
    task: Option<JoinHandle<()>>,
}

struct PushInner {
    stream: Arc<dyn MembershipEventStream>,
    sessions: Arc<dyn SessionProvider>,
    descriptor: RequiredAccessDescriptor,
    config: ChannelConfig,
    fallback: ValidationScheduler,
    on_added: Option<RefreshHook>,
    shared: Mutex<PushState>,
}

enum Flow {
    Continue,
    Terminate,
}

/// Push strategy with reconnect backoff and fallback to polling.
pub struct PushChannel {
    inner: Arc<PushInner>,
}

impl PushChannel {
    /// Creates a stopped push channel. `fallback` takes over when reconnects
    /// are exhausted.
    pub fn new(
        stream: Arc<dyn MembershipEventStream>,
        sessions: Arc<dyn SessionProvider>,
        descriptor: RequiredAccessDescriptor,
        config: ChannelConfig,
        fallback: ValidationScheduler,
    ) -> Self {
        Self {
            inner: Arc::new(PushInner {
                stream,
                sessions,
                descriptor,
                config,
                fallback,
                on_added: None,
                shared: Mutex::new(PushState {
                    phase: PushPhase::Idle,
                    epoch: 0,
                    signal: None,
                    task: None,
                }),
            }),
        }
    }

    /// Sets the hook run when the principal is added to the required group.
    ///
    /// Only effective before [`start`](NotificationChannel::start).
    pub fn with_refresh_hook(mut self, hook: RefreshHook) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.on_added = Some(hook);
        }
        self
    }

    /// Current phase.
    pub fn phase(&self) -> PushPhase {
        self.inner.shared.lock().phase
    }

    /// The fallback scheduler.
    pub fn fallback(&self) -> &ValidationScheduler {
        &self.inner.fallback
    }
}

impl fmt::Debug for PushChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushChannel")
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl NotificationChannel for PushChannel {
    fn mode(&self) -> ChannelMode {
        ChannelMode::Push
    }

    fn start(&self, on_access_lost: AccessLostSignal) -> Result<(), ChannelError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ChannelError::NoRuntime)?;
        let principal_id = self
            .inner
            .sessions
            .current_principal_id()
            .ok_or(ChannelError::NoPrincipal)?;

        let mut shared = self.inner.shared.lock();
        if matches!(
            shared.phase,
            PushPhase::Connecting | PushPhase::Connected | PushPhase::Reconnecting { .. }
        ) {
            tracing::warn!("push channel already running; ignoring start");
            return Ok(());
        }
        shared.epoch += 1;
        shared.phase = PushPhase::Connecting;
        shared.signal = Some(on_access_lost);
        let epoch = shared.epoch;
        shared.task = Some(runtime.spawn(run_push(Arc::clone(&self.inner), epoch, principal_id)));
        tracing::info!("push membership channel started");
        Ok(())
    }

    fn stop(&self) {
        let task = {
            let mut shared = self.inner.shared.lock();
            if shared.phase == PushPhase::Stopped || shared.phase == PushPhase::Idle {
                return;
            }
            shared.epoch += 1;
            shared.phase = PushPhase::Stopped;
            shared.signal = None;
            shared.task.take()
        };
        if let Some(task) = task {
            task.abort();
        }
        self.inner.fallback.cleanup();
        tracing::info!("push membership channel stopped");
    }

    fn is_active(&self) -> bool {
        match self.phase() {
            PushPhase::Connecting | PushPhase::Connected | PushPhase::Reconnecting { .. } => true,
            PushPhase::FallenBack => self.inner.fallback.is_running(),
            PushPhase::Idle | PushPhase::Stopped => false,
        }
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

impl PushInner {
    /// Sets the phase if `epoch` is still current.
    fn set_phase(&self, epoch: u64, phase: PushPhase) -> bool {
        let mut shared = self.shared.lock();
        if shared.epoch != epoch {
            return false;
        }
        shared.phase = phase;
        true
    }

    fn handle_event(&self, epoch: u64, principal_id: &str, event: MembershipEvent) -> Flow {
        let (username, group_id, action) = match event {
            MembershipEvent::Connected => {
                tracing::debug!("membership stream acknowledged");
                return Flow::Continue;
            }
            MembershipEvent::Heartbeat => {
                tracing::trace!("membership stream heartbeat");
                return Flow::Continue;
            }
            MembershipEvent::GroupMembershipChanged {
                username,
                group_id,
                action,
            } => (username, group_id, action),
        };

        if username != principal_id || group_id != self.descriptor.required_group_id {
            tracing::debug!(%username, %group_id, ?action, "membership change not relevant");
            return Flow::Continue;
        }
        if !self.descriptor.enforce {
            return Flow::Continue;
        }

        match action {
            MembershipAction::Removed => {
                tracing::warn!(
                    principal_id,
                    %group_id,
                    "principal removed from required group; access revoked"
                );
                let signal = {
                    let mut shared = self.shared.lock();
                    if shared.epoch != epoch {
                        return Flow::Terminate;
                    }
                    shared.epoch += 1;
                    shared.phase = PushPhase::Stopped;
                    shared.task = None;
                    shared.signal.take()
                };
                if let Some(signal) = signal {
                    signal.fire();
                }
                Flow::Terminate
            }
            MembershipAction::Added => {
                tracing::info!(principal_id, %group_id, "principal added to required group");
                if let Some(hook) = &self.on_added {
                    if catch_unwind(AssertUnwindSafe(|| hook())).is_err() {
                        tracing::error!("membership refresh hook panicked; panic contained");
                    }
                }
                Flow::Continue
            }
        }
    }

    fn fall_back(&self, epoch: u64) {
        let signal = {
            let mut shared = self.shared.lock();
            if shared.epoch != epoch {
                return;
            }
            shared.phase = PushPhase::FallenBack;
            shared.task = None;
            shared.signal.clone()
        };
        let Some(signal) = signal else {
            return;
        };
        tracing::warn!(
            max_reconnect_attempts = self.config.max_reconnect_attempts,
            "membership stream unavailable; falling back to polling"
        );
        self.fallback.initialize(signal);
    }
}

async fn run_push(inner: Arc<PushInner>, epoch: u64, principal_id: String) {
    let connect_timeout = inner.config.connect_timeout;
    let idle_timeout = inner.config.idle_timeout;
    let mut failures: u32 = 0;
    loop {
        match tokio::time::timeout(connect_timeout, inner.stream.connect(&principal_id)).await {
            Ok(Ok(mut subscription)) => {
                if !inner.set_phase(epoch, PushPhase::Connected) {
                    return;
                }
                tracing::info!(%principal_id, "membership stream connected");
                loop {
                    match tokio::time::timeout(idle_timeout, subscription.next_event()).await {
                        Ok(Some(Ok(event))) => {
                            failures = 0;
                            if let Flow::Terminate = inner.handle_event(epoch, &principal_id, event)
                            {
                                return;
                            }
                        }
                        Ok(Some(Err(ChannelError::Malformed(reason)))) => {
                            tracing::warn!(%reason, "skipping malformed membership event");
                        }
                        Ok(Some(Err(err))) => {
                            tracing::warn!(error = %err, "membership stream failed");
                            break;
                        }
                        Ok(None) => {
                            tracing::info!("membership stream closed by server");
                            break;
                        }
                        Err(_) => {
                            tracing::warn!(?idle_timeout, "membership stream went silent");
                            break;
                        }
                    }
                }
            }
            Ok(Err(err)) => tracing::warn!(error = %err, "membership stream connect failed"),
            Err(_) => tracing::warn!(?connect_timeout, "membership stream connect timed out"),
        }

        failures += 1;
        if failures > inner.config.max_reconnect_attempts {
            inner.fall_back(epoch);
            return;
        }
        if !inner.set_phase(epoch, PushPhase::Reconnecting { attempt: failures }) {
            return;
        }
        let delay = inner.config.backoff.delay_for_attempt(failures);
        tracing::debug!(attempt = failures, ?delay, "reconnecting membership stream");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_membership_change() {
        let event = MembershipEvent::from_json(
            r#"{"type":"group_membership_changed","username":"amir","groupId":"G1","action":"removed"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            MembershipEvent::GroupMembershipChanged {
                username: "amir".into(),
                group_id: "G1".into(),
                action: MembershipAction::Removed,
            }
        );
    }

    #[test]
    fn decodes_keepalives() {
        assert_eq!(
            MembershipEvent::from_json(r#"{"type":"heartbeat"}"#).unwrap(),
            MembershipEvent::Heartbeat
        );
        assert_eq!(
            MembershipEvent::from_json(r#"{"type":"connected"}"#).unwrap(),
            MembershipEvent::Connected
        );
    }

    #[test]
    fn rejects_unknown_events() {
        let err = MembershipEvent::from_json(r#"{"type":"role_changed"}"#).unwrap_err();
        assert!(matches!(err, ChannelError::Malformed(_)));
        assert!(MembershipEvent::from_json("not json").is_err());
    }

    #[test]
    fn rejects_unknown_action() {
        let err = MembershipEvent::from_json(
            r#"{"type":"group_membership_changed","username":"a","groupId":"G1","action":"renamed"}"#,
        );
        assert!(err.is_err());
    }
}
