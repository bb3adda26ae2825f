//! Session owner: sign-in gating, access loss and restoration.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    REQUIRED_GROUP, ScriptedFetcher, ScriptedStream, TestSession, collaborators, config, member,
    membership_change, settle,
};
use sirius_access::{
    ACCESS_REVOKED_REASON, AccessConfig, AuditTrail, ChannelMode, Error, GroupMembership,
    MembershipAction, MemorySessionStore, PersistedSession, Principal, SessionOwner, SessionState,
    SessionStore, TriggerBus, TriggerEvent, ViolationKind,
    audit::{AuditEventKind, AuditOutcome},
};

struct Harness {
    owner: SessionOwner,
    store: Arc<MemorySessionStore>,
    fetcher: Arc<ScriptedFetcher>,
    bus: TriggerBus,
}

fn harness_with(config: AccessConfig, events: Option<Arc<ScriptedStream>>) -> Harness {
    let fetcher = ScriptedFetcher::granting();
    let (deps, bus) = collaborators(TestSession::signed_in("amir"), fetcher.clone(), events);
    let store = Arc::new(MemorySessionStore::new());
    let owner = SessionOwner::new(config, deps, store.clone(), Arc::new(AuditTrail::new()));
    Harness {
        owner,
        store,
        fetcher,
        bus,
    }
}

fn harness() -> Harness {
    harness_with(config(), None)
}

/// Store whose writes always fail, as with a full or read-only disk.
struct ReadOnlyStore;

impl SessionStore for ReadOnlyStore {
    fn load(&self) -> Result<Option<PersistedSession>, Error> {
        Ok(None)
    }

    fn save(&self, _session: &PersistedSession) -> Result<(), Error> {
        Err(Error::Store("quota exceeded".into()))
    }

    fn clear(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn sign_in_persists_and_monitors() {
    let h = harness();
    let admission = h.owner.sign_in(Some(member("amir"))).unwrap();

    assert_eq!(admission.decision.matched_group_id.as_deref(), Some(REQUIRED_GROUP));
    assert_eq!(h.owner.state().principal().map(|p| p.id.as_str()), Some("amir"));
    assert!(h.owner.is_monitoring());
    assert_eq!(h.owner.channel_mode(), Some(ChannelMode::Pull));

    let persisted = h.store.load().unwrap().unwrap();
    assert!(persisted.authenticated);
    assert_eq!(persisted.principal.id, "amir");

    let sign_ins = h.owner.audit().of_kind(AuditEventKind::SignIn);
    assert_eq!(sign_ins.len(), 1);
    assert_eq!(sign_ins[0].outcome(), AuditOutcome::Success);
    assert_eq!(sign_ins[0].matched_group(), Some(REQUIRED_GROUP));
}

#[tokio::test(start_paused = true)]
async fn non_member_sign_in_is_denied() {
    let h = harness();
    let outsider = Principal::new("kim", "Kim")
        .with_groups(GroupMembership::new(["G9"], ["Field Ops"]));

    let violation = match h.owner.sign_in(Some(outsider)) {
        Err(Error::Violation(violation)) => violation,
        other => panic!("expected violation, got {other:?}"),
    };
    assert!(matches!(
        violation.kind,
        ViolationKind::MissingRequiredGroup { ref required_group_id } if required_group_id == REQUIRED_GROUP
    ));

    let SessionState::AccessDenied {
        principal_id,
        last_groups,
        ..
    } = h.owner.state()
    else {
        panic!("expected denied state");
    };
    assert_eq!(principal_id, "kim");
    assert_eq!(last_groups, vec!["Field Ops".to_string()]);
    assert!(h.store.raw().is_none());
    assert!(!h.owner.is_monitoring());

    let events = h.owner.audit().of_kind(AuditEventKind::SignIn);
    assert_eq!(events[0].outcome(), AuditOutcome::Denied);
}

#[tokio::test(start_paused = true)]
async fn anonymous_sign_in_is_unauthenticated() {
    let h = harness();
    let err = h.owner.sign_in(None).unwrap_err();
    assert!(matches!(
        err,
        Error::Violation(ref v) if v.kind == ViolationKind::Unauthenticated
    ));
    assert_eq!(h.owner.state(), SessionState::SignedOut);
}

#[tokio::test(start_paused = true)]
async fn revalidation_denial_revokes_the_session() {
    let h = harness();
    h.owner.sign_in(Some(member("amir"))).unwrap();

    h.fetcher.deny();
    h.bus.publish(TriggerEvent::Focus);
    settle().await;

    assert_eq!(
        h.owner.state(),
        SessionState::AccessDenied {
            principal_id: "amir".into(),
            reason: ACCESS_REVOKED_REASON.into(),
            last_groups: vec!["Field Ops".into(), "Sirius Users".into()],
        }
    );
    assert!(h.store.raw().is_none(), "reload must not restore a revoked session");
    assert!(!h.owner.is_monitoring());

    let revoked = h.owner.audit().of_kind(AuditEventKind::AccessRevoked);
    assert_eq!(revoked.len(), 1);
    assert_eq!(revoked[0].reason(), Some(ACCESS_REVOKED_REASON));
    assert_eq!(revoked[0].groups(), ["Field Ops".to_string(), "Sirius Users".to_string()]);

    // nothing keeps polling
    tokio::time::sleep(Duration::from_secs(1200)).await;
    assert_eq!(h.fetcher.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn revocation_reports_groups_from_the_latest_refresh() {
    let h = harness();
    h.owner.sign_in(Some(member("amir"))).unwrap();

    h.fetcher.set_groups([REQUIRED_GROUP, "G5"], ["Sirius Users", "Analysts"]);
    assert!(h.owner.refresh_membership().await.unwrap());
    h.owner.handle_access_lost();

    let last_groups = match h.owner.state() {
        SessionState::AccessDenied { last_groups, .. } => last_groups,
        other => panic!("expected denied state, got {other:?}"),
    };
    assert_eq!(last_groups, vec!["Analysts".to_string(), "Sirius Users".to_string()]);
    let revoked = h.owner.audit().of_kind(AuditEventKind::AccessRevoked);
    assert_eq!(revoked[0].groups(), last_groups.as_slice());
}

#[tokio::test(start_paused = true)]
async fn unpersistable_sign_in_is_audited_as_error() {
    let fetcher = ScriptedFetcher::granting();
    let (deps, _bus) = collaborators(TestSession::signed_in("amir"), fetcher.clone(), None);
    let owner = SessionOwner::new(
        config(),
        deps,
        Arc::new(ReadOnlyStore),
        Arc::new(AuditTrail::new()),
    );

    let err = owner.sign_in(Some(member("amir"))).unwrap_err();
    assert!(matches!(err, Error::Store(_)));
    assert_eq!(owner.state(), SessionState::SignedOut);
    assert!(!owner.is_monitoring());

    let sign_ins = owner.audit().of_kind(AuditEventKind::SignIn);
    assert_eq!(sign_ins.len(), 1);
    assert_eq!(sign_ins[0].outcome(), AuditOutcome::Error);
    assert_eq!(sign_ins[0].principal(), Some("amir"));
    assert!(sign_ins[0].reason().is_some_and(|r| r.contains("quota exceeded")));
}

#[tokio::test(start_paused = true)]
async fn access_loss_is_handled_once() {
    let h = harness();
    h.owner.sign_in(Some(member("amir"))).unwrap();

    h.owner.handle_access_lost();
    h.owner.handle_access_lost_with_reason("second call");

    assert!(h.owner.state().is_denied());
    assert_eq!(h.owner.audit().of_kind(AuditEventKind::AccessRevoked).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_keep_the_session() {
    let h = harness();
    h.owner.sign_in(Some(member("amir"))).unwrap();

    h.fetcher.fail();
    h.bus.publish(TriggerEvent::Focus);
    settle().await;

    assert!(matches!(h.owner.state(), SessionState::Active { .. }));
    assert!(h.owner.is_monitoring());
    assert!(h.store.raw().is_some());
}

#[tokio::test(start_paused = true)]
async fn sign_out_clears_everything() {
    let h = harness();
    h.owner.sign_in(Some(member("amir"))).unwrap();

    h.owner.sign_out();

    assert_eq!(h.owner.state(), SessionState::SignedOut);
    assert!(h.store.raw().is_none());
    assert!(!h.owner.is_monitoring());
    let sign_outs = h.owner.audit().of_kind(AuditEventKind::SignOut);
    assert_eq!(sign_outs[0].principal(), Some("amir"));
}

#[tokio::test(start_paused = true)]
async fn restore_resumes_monitoring() {
    let h = harness();
    h.store
        .save(&PersistedSession {
            principal: member("amir"),
            authenticated: true,
        })
        .unwrap();

    let admission = h.owner.restore().unwrap().expect("session restored");
    assert_eq!(admission.principal.id, "amir");
    assert!(h.owner.is_monitoring());
    assert_eq!(
        h.owner.audit().of_kind(AuditEventKind::SessionRestored)[0].outcome(),
        AuditOutcome::Success
    );
}

#[tokio::test(start_paused = true)]
async fn restore_without_blob_is_a_no_op() {
    let h = harness();
    assert!(h.owner.restore().unwrap().is_none());

    h.store
        .save(&PersistedSession {
            principal: member("amir"),
            authenticated: false,
        })
        .unwrap();
    assert!(h.owner.restore().unwrap().is_none());
    assert_eq!(h.owner.state(), SessionState::SignedOut);
}

#[tokio::test(start_paused = true)]
async fn restore_of_stale_grant_is_denied() {
    let h = harness();
    h.store
        .save(&PersistedSession {
            principal: Principal::new("amir", "Amir")
                .with_groups(GroupMembership::new(["G9"], ["Field Ops"])),
            authenticated: true,
        })
        .unwrap();

    assert!(matches!(h.owner.restore(), Err(Error::Violation(_))));
    assert!(h.owner.state().is_denied());
    assert!(h.store.raw().is_none());
}

#[tokio::test(start_paused = true)]
async fn corrupt_blob_is_discarded() {
    let h = harness();
    h.store.set_raw("{broken");
    assert!(matches!(h.owner.restore(), Err(Error::Store(_))));
    assert!(h.store.raw().is_none());
}

#[tokio::test(start_paused = true)]
async fn push_removal_revokes_the_session() {
    let stream = ScriptedStream::new();
    let tx = stream.queue_connection();
    let mut config = config();
    config.channel.mode = ChannelMode::Push;
    let h = harness_with(config, Some(stream));

    h.owner.sign_in(Some(member("amir"))).unwrap();
    assert_eq!(h.owner.channel_mode(), Some(ChannelMode::Push));
    settle().await;

    tx.send(Ok(membership_change("amir", REQUIRED_GROUP, MembershipAction::Removed)))
        .unwrap();
    settle().await;

    assert!(h.owner.state().is_denied());
    assert!(h.store.raw().is_none());
    assert!(!h.owner.is_monitoring());
}

#[tokio::test(start_paused = true)]
async fn push_addition_refreshes_groups() {
    let stream = ScriptedStream::new();
    let tx = stream.queue_connection();
    let mut config = config();
    config.channel.mode = ChannelMode::Push;
    let h = harness_with(config, Some(stream));

    h.owner.sign_in(Some(member("amir"))).unwrap();
    h.fetcher.set_groups([REQUIRED_GROUP, "G5"], ["Sirius Users", "Analysts"]);
    settle().await;

    tx.send(Ok(membership_change("amir", REQUIRED_GROUP, MembershipAction::Added)))
        .unwrap();
    settle().await;

    let principal = h.owner.state().principal().cloned().unwrap();
    assert!(principal.groups.group_ids.contains("G5"));
    let persisted = h.store.load().unwrap().unwrap();
    assert!(persisted.principal.groups.group_names.contains("Analysts"));
}

#[tokio::test(start_paused = true)]
async fn refresh_membership_updates_snapshot() {
    let h = harness();
    assert!(!h.owner.refresh_membership().await.unwrap());

    h.owner.sign_in(Some(member("amir"))).unwrap();
    h.fetcher.set_groups([REQUIRED_GROUP], ["Sirius Users (renamed)"]);
    assert!(h.owner.refresh_membership().await.unwrap());

    let principal = h.owner.state().principal().cloned().unwrap();
    assert_eq!(principal.groups.names(), vec!["Sirius Users (renamed)".to_string()]);

    h.fetcher.fail();
    assert!(matches!(h.owner.refresh_membership().await, Err(Error::Fetch(_))));
}
