//! Session monitoring demonstration.
//!
//! This example walks one portal session through its lifecycle:
//! 1. Sign in a member of the required group
//! 2. Revalidate on a window-focus event while access still holds
//! 3. Remove the user from the group on the portal side
//! 4. Watch the next focus check revoke the session
//! 5. Read back the audit trail
//!
//! The portal is an in-memory transport serving community user documents,
//! so no network is needed.
//!
//! Run with: `RUST_LOG=info cargo run --example session_monitoring`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sirius_access::{
    AccessConfig, AuditTrail, Collaborators, FetchError, GroupMembership, MemorySessionStore,
    PortalGroupFetcher, PortalRequest, PortalToken, PortalTransport, Principal,
    RequiredAccessDescriptor, SessionOwner, SessionProvider, SessionState, TriggerBus,
    TriggerEvent,
};
use tracing_subscriber::EnvFilter;

const SIRIUS_USERS: &str = "a1b2c3d4";

/// Portal that answers every user lookup with the current group list.
#[derive(Clone)]
struct InMemoryPortal {
    groups: Arc<Mutex<Vec<(&'static str, &'static str)>>>,
}

impl InMemoryPortal {
    fn remove_group(&self, id: &str) {
        self.groups.lock().retain(|(group_id, _)| *group_id != id);
    }
}

#[async_trait]
impl PortalTransport for InMemoryPortal {
    async fn get(&self, request: &PortalRequest) -> Result<String, FetchError> {
        tracing::debug!(path = %request.path, "portal request");
        let groups: Vec<serde_json::Value> = self
            .groups
            .lock()
            .iter()
            .map(|(id, title)| serde_json::json!({ "id": id, "title": title }))
            .collect();
        Ok(serde_json::json!({ "username": "amir", "groups": groups }).to_string())
    }
}

/// Transport session that stays signed in for the whole run.
struct PortalSession;

#[async_trait]
impl SessionProvider for PortalSession {
    async fn has_active_session(&self) -> bool {
        true
    }

    fn current_principal_id(&self) -> Option<String> {
        Some("amir".to_string())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let portal = InMemoryPortal {
        groups: Arc::new(Mutex::new(vec![
            (SIRIUS_USERS, "Sirius Users"),
            ("f0e1", "Field Ops"),
        ])),
    };
    let fetcher = PortalGroupFetcher::new(portal.clone()).with_token(PortalToken::new("demo"));

    let mut config = AccessConfig {
        access: RequiredAccessDescriptor::new(SIRIUS_USERS, ["Sirius Users"]),
        ..AccessConfig::default()
    };
    // Short throttle so consecutive focus events are not swallowed.
    config.validation.min_focus_interval = Duration::from_millis(100);
    if let Err(err) = config.validate() {
        tracing::error!(error = %err, "invalid demo config");
        return;
    }

    let triggers = TriggerBus::new();
    let deps = Collaborators {
        sessions: Arc::new(PortalSession),
        fetcher: Arc::new(fetcher),
        triggers: triggers.clone(),
        events: None,
    };
    let owner = SessionOwner::new(
        config,
        deps,
        Arc::new(MemorySessionStore::new()),
        Arc::new(AuditTrail::new()),
    );

    // Scenario 1: sign-in
    let principal = Principal::new("amir", "Amir Hamzah").with_groups(GroupMembership::new(
        [SIRIUS_USERS, "f0e1"],
        ["Sirius Users", "Field Ops"],
    ));
    match owner.sign_in(Some(principal)) {
        Ok(admission) => tracing::info!(
            matched = ?admission.decision.matched_group_id,
            "signed in"
        ),
        Err(err) => {
            tracing::error!(error = %err, "sign-in refused");
            return;
        }
    }

    // Scenario 2: focus while still a member
    triggers.publish(TriggerEvent::Focus);
    tokio::time::sleep(Duration::from_millis(200)).await;
    tracing::info!(denied = owner.state().is_denied(), "after first focus check");

    // Scenario 3: removed from the group, next focus revokes
    portal.remove_group(SIRIUS_USERS);
    triggers.publish(TriggerEvent::Focus);
    tokio::time::sleep(Duration::from_millis(200)).await;

    match owner.state() {
        SessionState::AccessDenied {
            reason,
            last_groups,
            ..
        } => tracing::info!(%reason, ?last_groups, "session revoked"),
        other => tracing::warn!(state = ?other, "session unexpectedly still open"),
    }
    tracing::info!(monitoring = owner.is_monitoring(), "monitoring state");

    // Scenario 4: audit trail
    for event in owner.audit().events() {
        tracing::info!(
            kind = %event.kind(),
            outcome = %event.outcome(),
            principal = ?event.principal(),
            reason = ?event.reason(),
            "audit record"
        );
    }
}
