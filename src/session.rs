//! Session ownership: sign-in, restoration, sign-out and access loss.
//!
//! [`SessionOwner`] is the layer that owns the monitoring channel. It is the
//! only place that reacts to the access-lost signal: it marks the session
//! denied, stops monitoring and clears persistence so a reload cannot bring
//! the revoked session back.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::audit::{AuditEvent, AuditEventKind, AuditOutcome, AuditTrail, emit_and_record};
use crate::channel::{Collaborators, NotificationChannel, RefreshHook, build_channel};
use crate::config::{AccessConfig, ChannelMode};
use crate::error::{Error, ViolationKind};
use crate::fetch::{GroupFetcher, TimeoutFetcher};
use crate::gate::{AccessGate, Admission};
use crate::principal::{GroupMembership, Principal};
use crate::signal::AccessLostSignal;

/// Reason recorded when continuous revalidation revokes access.
pub const ACCESS_REVOKED_REASON: &str =
    "Access revoked: no longer a member of the required group";

/// The session-restoration blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    /// Principal as of the last save
    pub principal: Principal,
    /// Whether the principal had passed the sign-in gate
    pub authenticated: bool,
}

/// Ephemeral storage for [`PersistedSession`].
pub trait SessionStore: Send + Sync {
    /// Reads the blob, if present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] when the blob exists but cannot be read.
    fn load(&self) -> Result<Option<PersistedSession>, Error>;

    /// Replaces the blob.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] when the blob cannot be written.
    fn save(&self, session: &PersistedSession) -> Result<(), Error>;

    /// Removes the blob. Removing an absent blob succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] when the blob cannot be removed.
    fn clear(&self) -> Result<(), Error>;
}

/// In-memory [`SessionStore`] holding the blob as JSON text.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    blob: Mutex<Option<String>>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw JSON currently stored.
    pub fn raw(&self) -> Option<String> {
        self.blob.lock().clone()
    }

    /// Overwrites the raw JSON, bypassing serialization.
    pub fn set_raw(&self, json: impl Into<String>) {
        *self.blob.lock() = Some(json.into());
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<PersistedSession>, Error> {
        self.blob
            .lock()
            .as_deref()
            .map(serde_json::from_str::<PersistedSession>)
            .transpose()
            .map_err(|e| Error::Store(format!("corrupt session blob: {e}")))
    }

    fn save(&self, session: &PersistedSession) -> Result<(), Error> {
        let json = serde_json::to_string(session)
            .map_err(|e| Error::Store(format!("cannot encode session: {e}")))?;
        *self.blob.lock() = Some(json);
        Ok(())
    }

    fn clear(&self) -> Result<(), Error> {
        *self.blob.lock() = None;
        Ok(())
    }
}

/// Where the session stands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No principal
    #[default]
    SignedOut,
    /// Signed in and monitored
    Active {
        /// The admitted principal
        principal: Principal,
    },
    /// Sign-in refused or access revoked
    AccessDenied {
        /// Who was denied
        principal_id: String,
        /// Human-readable reason for the denial screen
        reason: String,
        /// Group names from the last known membership snapshot (sign-in or
        /// the latest refresh), for support staff
        last_groups: Vec<String>,
    },
}

impl SessionState {
    /// The active principal, if any.
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Self::Active { principal } => Some(principal),
            _ => None,
        }
    }

    /// Whether the session is in the denied state.
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::AccessDenied { .. })
    }
}

struct OwnerShared {
    state: SessionState,
    channel: Option<Box<dyn NotificationChannel>>,
}

struct OwnerInner {
    config: AccessConfig,
    deps: Collaborators,
    store: Arc<dyn SessionStore>,
    audit: Arc<AuditTrail>,
    shared: Mutex<OwnerShared>,
}

/// Owns one user session and its access monitoring.
///
/// # Examples
///
/// ```no_run
/// # use std::sync::Arc;
/// # use sirius_access::{AccessConfig, AuditTrail, Collaborators, MemorySessionStore, Principal, SessionOwner};
/// # async fn demo(deps: Collaborators, principal: Principal) -> Result<(), sirius_access::Error> {
/// let owner = SessionOwner::new(
///     AccessConfig::default(),
///     deps,
///     Arc::new(MemorySessionStore::new()),
///     Arc::new(AuditTrail::new()),
/// );
/// owner.sign_in(Some(principal))?;
/// assert!(owner.is_monitoring());
/// owner.sign_out();
/// # Ok(())
/// # }
/// ```
pub struct SessionOwner {
    inner: Arc<OwnerInner>,
}

impl fmt::Debug for SessionOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOwner")
            .field("state", &self.state())
            .field("monitoring", &self.is_monitoring())
            .finish_non_exhaustive()
    }
}

impl SessionOwner {
    /// Creates a signed-out owner.
    pub fn new(
        config: AccessConfig,
        deps: Collaborators,
        store: Arc<dyn SessionStore>,
        audit: Arc<AuditTrail>,
    ) -> Self {
        Self {
            inner: Arc::new(OwnerInner {
                config,
                deps,
                store,
                audit,
                shared: Mutex::new(OwnerShared {
                    state: SessionState::SignedOut,
                    channel: None,
                }),
            }),
        }
    }

    /// Gates `principal`, persists the session and starts monitoring.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::Violation`] when there is no principal or it lacks the
    ///   required group. A group denial leaves the session in
    ///   [`SessionState::AccessDenied`].
    /// - [`Error::Store`] when the session cannot be persisted.
    /// - [`Error::Channel`] when monitoring cannot start; the session is
    ///   rolled back to signed out.
    pub fn sign_in(&self, principal: Option<Principal>) -> Result<Admission, Error> {
        let inner = &self.inner;
        let snapshot = principal.clone();

        let admission = match AccessGate::new(principal, &inner.config.access).admit() {
            Ok(admission) => admission,
            Err(violation) => {
                let principal_id = snapshot.as_ref().map(|p| p.id.clone());
                tracing::warn!(
                    principal_id = principal_id.as_deref().unwrap_or("-"),
                    kind = %violation.kind,
                    "sign-in refused"
                );
                let mut event = AuditEvent::new(
                    principal_id.clone(),
                    AuditEventKind::SignIn,
                    AuditOutcome::Denied,
                )
                .with_reason(violation.message.clone());

                if let (ViolationKind::MissingRequiredGroup { .. }, Some(principal)) =
                    (&violation.kind, snapshot)
                {
                    let last_groups = principal.groups.names();
                    event = event.with_groups(last_groups.clone());
                    inner.shared.lock().state = SessionState::AccessDenied {
                        principal_id: principal.id,
                        reason: violation.message.clone(),
                        last_groups,
                    };
                    inner.clear_store();
                }
                emit_and_record(event, &inner.audit);
                return Err(violation.into());
            }
        };

        if let Err(err) = inner.store.save(&PersistedSession {
            principal: admission.principal.clone(),
            authenticated: true,
        }) {
            tracing::error!(
                principal_id = %admission.principal.id,
                error = %err,
                "sign-in could not be persisted"
            );
            emit_and_record(
                AuditEvent::new(
                    Some(admission.principal.id.clone()),
                    AuditEventKind::SignIn,
                    AuditOutcome::Error,
                )
                .with_reason(err.to_string()),
                &inner.audit,
            );
            return Err(err);
        }
        inner.activate(admission.principal.clone());

        if let Err(err) = OwnerInner::start_monitoring(inner) {
            inner.roll_back(&admission.principal.id, &err);
            return Err(err);
        }

        let mut event = AuditEvent::new(
            Some(admission.principal.id.clone()),
            AuditEventKind::SignIn,
            AuditOutcome::Success,
        );
        if let Some(group) = admission
            .decision
            .matched_group_id
            .as_ref()
            .or(admission.decision.matched_group_name.as_ref())
        {
            event = event.with_matched_group(group.clone());
        }
        emit_and_record(event, &inner.audit);
        tracing::info!(principal_id = %admission.principal.id, "signed in");
        Ok(admission)
    }

    /// Re-hydrates the session from the store and resumes monitoring.
    ///
    /// Returns `Ok(None)` when there is nothing to restore. A persisted
    /// principal that no longer passes the gate is treated like a refused
    /// sign-in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] for an unreadable blob, otherwise as
    /// [`sign_in`](Self::sign_in).
    pub fn restore(&self) -> Result<Option<Admission>, Error> {
        let inner = &self.inner;
        let persisted = match inner.store.load() {
            Ok(persisted) => persisted,
            Err(err) => {
                tracing::warn!(error = %err, "discarding unreadable session blob");
                inner.clear_store();
                return Err(err);
            }
        };
        let Some(persisted) = persisted.filter(|p| p.authenticated) else {
            tracing::debug!("no session to restore");
            return Ok(None);
        };

        let gate = AccessGate::new(Some(persisted.principal.clone()), &inner.config.access);
        let admission = match gate.admit() {
            Ok(admission) => admission,
            Err(violation) => {
                let principal = persisted.principal;
                let last_groups = principal.groups.names();
                inner.shared.lock().state = SessionState::AccessDenied {
                    principal_id: principal.id.clone(),
                    reason: violation.message.clone(),
                    last_groups: last_groups.clone(),
                };
                inner.clear_store();
                emit_and_record(
                    AuditEvent::new(
                        Some(principal.id),
                        AuditEventKind::SessionRestored,
                        AuditOutcome::Denied,
                    )
                    .with_reason(violation.message.clone())
                    .with_groups(last_groups),
                    &inner.audit,
                );
                return Err(violation.into());
            }
        };

        inner.activate(admission.principal.clone());
        if let Err(err) = OwnerInner::start_monitoring(inner) {
            inner.roll_back(&admission.principal.id, &err);
            return Err(err);
        }

        emit_and_record(
            AuditEvent::new(
                Some(admission.principal.id.clone()),
                AuditEventKind::SessionRestored,
                AuditOutcome::Success,
            ),
            &inner.audit,
        );
        tracing::info!(principal_id = %admission.principal.id, "session restored");
        Ok(Some(admission))
    }

    /// Stops monitoring, clears persistence and forgets the principal.
    pub fn sign_out(&self) {
        let inner = &self.inner;
        let (previous, channel) = {
            let mut shared = inner.shared.lock();
            let previous = std::mem::take(&mut shared.state);
            (previous, shared.channel.take())
        };
        if let Some(channel) = channel {
            channel.stop();
        }
        inner.clear_store();

        let principal_id = match previous {
            SessionState::Active { principal } => Some(principal.id),
            SessionState::AccessDenied { principal_id, .. } => Some(principal_id),
            SessionState::SignedOut => None,
        };
        emit_and_record(
            AuditEvent::new(principal_id, AuditEventKind::SignOut, AuditOutcome::Success),
            &inner.audit,
        );
        tracing::info!("signed out");
    }

    /// Performs the access-lost contract with the default reason.
    pub fn handle_access_lost(&self) {
        self.inner.revoke(ACCESS_REVOKED_REASON);
    }

    /// Performs the access-lost contract with a custom reason.
    ///
    /// Only acts on an active session; calling it again is a no-op.
    pub fn handle_access_lost_with_reason(&self, reason: &str) {
        self.inner.revoke(reason);
    }

    /// Refetches the principal's groups and updates the active session.
    ///
    /// Returns `Ok(false)` when no session is active.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fetch`] when the portal cannot be reached and
    /// [`Error::Store`] when the refreshed session cannot be persisted.
    pub async fn refresh_membership(&self) -> Result<bool, Error> {
        OwnerInner::refresh(Arc::clone(&self.inner)).await
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.inner.shared.lock().state.clone()
    }

    /// Whether a channel is still watching this session.
    pub fn is_monitoring(&self) -> bool {
        self.inner
            .shared
            .lock()
            .channel
            .as_ref()
            .is_some_and(|channel| channel.is_active())
    }

    /// Strategy of the current channel, if monitoring was started.
    pub fn channel_mode(&self) -> Option<ChannelMode> {
        self.inner.shared.lock().channel.as_ref().map(|c| c.mode())
    }

    /// The audit trail this owner records into.
    pub fn audit(&self) -> &AuditTrail {
        &self.inner.audit
    }
}

impl OwnerInner {
    fn activate(&self, principal: Principal) {
        self.shared.lock().state = SessionState::Active { principal };
    }

    fn clear_store(&self) {
        if let Err(err) = self.store.clear() {
            tracing::error!(error = %err, "failed to clear persisted session");
        }
    }

    fn roll_back(&self, principal_id: &str, err: &Error) {
        tracing::error!(principal_id, error = %err, "monitoring failed to start; signing out");
        let channel = {
            let mut shared = self.shared.lock();
            shared.state = SessionState::SignedOut;
            shared.channel.take()
        };
        if let Some(channel) = channel {
            channel.stop();
        }
        self.clear_store();
    }

    fn start_monitoring(this: &Arc<Self>) -> Result<(), Error> {
        let weak = Arc::downgrade(this);
        let hook: RefreshHook = Arc::new(move || spawn_refresh(&weak));
        let channel = build_channel(&this.config, &this.deps, Some(hook));

        let weak = Arc::downgrade(this);
        let signal = AccessLostSignal::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.revoke(ACCESS_REVOKED_REASON);
            }
        });
        channel.start(signal)?;
        tracing::info!(mode = ?channel.mode(), "access monitoring started");

        let stale = {
            let mut shared = this.shared.lock();
            if matches!(shared.state, SessionState::Active { .. }) {
                shared.channel.replace(channel)
            } else {
                // revoked while starting
                Some(channel)
            }
        };
        if let Some(stale) = stale {
            stale.stop();
        }
        Ok(())
    }

    fn revoke(&self, reason: &str) {
        let (principal, channel) = {
            let mut shared = self.shared.lock();
            let SessionState::Active { principal } = &shared.state else {
                tracing::debug!("access-lost ignored; no active session");
                return;
            };
            let principal = principal.clone();
            shared.state = SessionState::AccessDenied {
                principal_id: principal.id.clone(),
                reason: reason.to_string(),
                last_groups: principal.groups.names(),
            };
            (principal, shared.channel.take())
        };

        if let Some(channel) = channel {
            channel.stop();
        }
        self.clear_store();

        tracing::warn!(principal_id = %principal.id, reason, "access revoked");
        emit_and_record(
            AuditEvent::new(
                Some(principal.id.clone()),
                AuditEventKind::AccessRevoked,
                AuditOutcome::Denied,
            )
            .with_reason(reason)
            .with_groups(principal.groups.names()),
            &self.audit,
        );
    }

    async fn refresh(this: Arc<Self>) -> Result<bool, Error> {
        let Some(principal_id) = this.shared.lock().state.principal().map(|p| p.id.clone()) else {
            return Ok(false);
        };

        let fetcher = TimeoutFetcher::new(
            Arc::clone(&this.deps.fetcher),
            this.config.validation.fetch_timeout,
        );
        let groups: GroupMembership = fetcher.fetch_groups(&principal_id).await?;

        let persisted = {
            let mut shared = this.shared.lock();
            let SessionState::Active { principal } = &mut shared.state else {
                return Ok(false);
            };
            if principal.id != principal_id {
                return Ok(false);
            }
            principal.groups = groups;
            PersistedSession {
                principal: principal.clone(),
                authenticated: true,
            }
        };
        this.store.save(&persisted)?;
        tracing::info!(%principal_id, "group membership refreshed");
        Ok(true)
    }
}

impl Drop for OwnerInner {
    fn drop(&mut self) {
        if let Some(channel) = self.shared.get_mut().channel.take() {
            channel.stop();
        }
    }
}

fn spawn_refresh(owner: &Weak<OwnerInner>) {
    let Some(inner) = owner.upgrade() else {
        return;
    };
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::warn!("no runtime for membership refresh");
        return;
    };
    runtime.spawn(async move {
        if let Err(err) = OwnerInner::refresh(inner).await {
            tracing::warn!(error = %err, "membership refresh failed");
        }
    });
}
