//! Test doubles shared by the integration suites.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sirius_access::{
    AccessConfig, AccessLostSignal, ChannelError, Collaborators, EventSubscription, FetchError,
    GroupFetcher, GroupMembership, MembershipAction, MembershipEvent, MembershipEventStream,
    Principal, RequiredAccessDescriptor, SessionProvider, TriggerBus,
};
use tokio::sync::mpsc;

pub const REQUIRED_GROUP: &str = "G1";

pub fn descriptor() -> RequiredAccessDescriptor {
    RequiredAccessDescriptor::new(REQUIRED_GROUP, ["Sirius Users"])
}

pub fn config() -> AccessConfig {
    AccessConfig {
        access: descriptor(),
        ..AccessConfig::default()
    }
}

pub fn member(id: &str) -> Principal {
    Principal::new(id, id.to_uppercase())
        .with_groups(GroupMembership::new([REQUIRED_GROUP], ["Sirius Users", "Field Ops"]))
}

/// Lets every ready task run; with a paused clock this also fires due timers.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// An access-lost signal that counts how often its handler ran.
pub fn counting_signal() -> (AccessLostSignal, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    let signal = AccessLostSignal::new(move || {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    (signal, count)
}

/// Transport session with a settable principal.
pub struct TestSession {
    active: AtomicBool,
    stalled: AtomicBool,
    principal: Mutex<Option<String>>,
}

impl TestSession {
    pub fn signed_in(id: &str) -> Arc<Self> {
        Arc::new(Self {
            active: AtomicBool::new(true),
            stalled: AtomicBool::new(false),
            principal: Mutex::new(Some(id.to_string())),
        })
    }

    pub fn anonymous() -> Arc<Self> {
        Arc::new(Self {
            active: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
            principal: Mutex::new(None),
        })
    }

    pub fn end(&self) {
        self.active.store(false, Ordering::SeqCst);
        *self.principal.lock() = None;
    }

    /// Makes every later session lookup hang forever.
    pub fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionProvider for TestSession {
    async fn has_active_session(&self) -> bool {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.active.load(Ordering::SeqCst)
    }

    fn current_principal_id(&self) -> Option<String> {
        self.principal.lock().clone()
    }
}

#[derive(Clone)]
enum Reply {
    Groups(GroupMembership),
    Fail,
}

/// Group fetcher with scriptable replies, latency and call accounting.
pub struct ScriptedFetcher {
    reply: Mutex<Reply>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedFetcher {
    fn with(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply: Mutex::new(reply),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    /// Replies with membership in the required group.
    pub fn granting() -> Arc<Self> {
        Self::with(Reply::Groups(GroupMembership::new(
            [REQUIRED_GROUP],
            ["Sirius Users"],
        )))
    }

    /// Replies with membership that lacks the required group.
    pub fn denying() -> Arc<Self> {
        Self::with(Reply::Groups(GroupMembership::new(["G9"], ["Field Ops"])))
    }

    /// Every fetch fails with a transport error.
    pub fn failing() -> Arc<Self> {
        Self::with(Reply::Fail)
    }

    pub fn set_groups<I, N>(&self, ids: I, names: N)
    where
        I: IntoIterator,
        I::Item: Into<String>,
        N: IntoIterator,
        N::Item: Into<String>,
    {
        *self.reply.lock() = Reply::Groups(GroupMembership::new(ids, names));
    }

    pub fn deny(&self) {
        self.set_groups(["G9"], ["Field Ops"]);
    }

    pub fn fail(&self) {
        *self.reply.lock() = Reply::Fail;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GroupFetcher for ScriptedFetcher {
    async fn fetch_groups(&self, _principal_id: &str) -> Result<GroupMembership, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let reply = self.reply.lock().clone();

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match reply {
            Reply::Groups(groups) => Ok(groups),
            Reply::Fail => Err(FetchError::Transport("connection reset".into())),
        }
    }
}

type EventSender = mpsc::UnboundedSender<Result<MembershipEvent, ChannelError>>;
type EventReceiver = mpsc::UnboundedReceiver<Result<MembershipEvent, ChannelError>>;

/// Membership stream whose connections are queued by the test.
///
/// Each queued connection is consumed by one `connect`; with nothing queued
/// `connect` fails, or hangs after [`stall_connects`](Self::stall_connects).
#[derive(Default)]
pub struct ScriptedStream {
    pending: Mutex<VecDeque<EventReceiver>>,
    connects: AtomicUsize,
    stall_connects: AtomicBool,
}

impl ScriptedStream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues a connection and returns the sender feeding it.
    pub fn queue_connection(&self) -> EventSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.pending.lock().push_back(rx);
        tx
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Connection attempts with nothing queued never complete.
    pub fn stall_connects(&self) {
        self.stall_connects.store(true, Ordering::SeqCst);
    }
}

struct ScriptedSubscription {
    rx: EventReceiver,
}

#[async_trait]
impl EventSubscription for ScriptedSubscription {
    async fn next_event(&mut self) -> Option<Result<MembershipEvent, ChannelError>> {
        self.rx.recv().await
    }
}

#[async_trait]
impl MembershipEventStream for ScriptedStream {
    async fn connect(
        &self,
        _principal_id: &str,
    ) -> Result<Box<dyn EventSubscription>, ChannelError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let queued = self.pending.lock().pop_front();
        match queued {
            Some(rx) => Ok(Box::new(ScriptedSubscription { rx })),
            None if self.stall_connects.load(Ordering::SeqCst) => {
                std::future::pending::<()>().await;
                Err(ChannelError::Connect("unreachable".into()))
            }
            None => Err(ChannelError::Connect("connection refused".into())),
        }
    }
}

pub fn membership_change(username: &str, group_id: &str, action: MembershipAction) -> MembershipEvent {
    MembershipEvent::GroupMembershipChanged {
        username: username.to_string(),
        group_id: group_id.to_string(),
        action,
    }
}

pub fn collaborators(
    sessions: Arc<TestSession>,
    fetcher: Arc<ScriptedFetcher>,
    events: Option<Arc<ScriptedStream>>,
) -> (Collaborators, TriggerBus) {
    let triggers = TriggerBus::new();
    let deps = Collaborators {
        sessions,
        fetcher,
        triggers: triggers.clone(),
        events: events.map(|s| s as Arc<dyn MembershipEventStream>),
    };
    (deps, triggers)
}
