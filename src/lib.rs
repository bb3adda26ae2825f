//! Continuous access revalidation for SIRIUS Portal sessions.
//!
//! Sign-in checks a user's group membership once. This crate keeps checking
//! for as long as the session lives, so that removing someone from the
//! required portal group locks them out within minutes instead of at their
//! next sign-in.
//!
//! - **Evaluation**: [`evaluate`] decides a membership snapshot against a
//!   [`RequiredAccessDescriptor`]. Group ids win; legacy display names are a
//!   compatibility fallback.
//! - **Revalidation**: [`ValidationScheduler`] refetches membership on a
//!   timer, on focus/visibility return and on activity after idle. At most
//!   one check is in flight; transport failures fail open, an explicit denial
//!   fails closed.
//! - **Delivery**: a [`NotificationChannel`] is either the polling scheduler
//!   or a push membership stream that falls back to polling.
//! - **Ownership**: [`SessionOwner`] reacts to the [`AccessLostSignal`] by
//!   marking the session denied, stopping monitoring and clearing the
//!   persisted session.
//!
//! # Core Types
//!
//! - [`Principal`] and [`GroupMembership`]: who is signed in and what they hold
//! - [`AccessGate`]: sign-in admission
//! - [`AccessConfig`]: TOML and environment configuration
//! - [`PortalToken`]: access token that redacts itself in logs
//!
//! # Examples
//!
//! ```
//! use sirius_access::{AccessGate, GroupMembership, Principal, RequiredAccessDescriptor, evaluate};
//!
//! let descriptor = RequiredAccessDescriptor::new("G1", ["Sirius Users"]);
//!
//! // Renamed group, id still matches
//! let groups = GroupMembership::new(["G1"], ["Sirius Users (2024)"]);
//! assert!(evaluate(&groups.group_ids, &groups.group_names, &descriptor).granted);
//!
//! // Sign-in gate refuses non-members
//! let outsider = Principal::new("kim", "Kim")
//!     .with_groups(GroupMembership::new(["G9"], ["Field Ops"]));
//! assert!(AccessGate::new(Some(outsider), &descriptor).admit().is_err());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
mod channel;
mod config;
mod error;
mod fetch;
mod gate;
mod logging;
mod policy;
mod portal;
mod principal;
mod scheduler;
mod session;
mod signal;
mod state;
mod token;
mod trigger;

pub use audit::AuditTrail;
pub use channel::{
    Collaborators, EventSubscription, MembershipAction, MembershipEvent, MembershipEventStream,
    NotificationChannel, PullChannel, PushChannel, PushPhase, RefreshHook, build_channel,
};
pub use config::{AccessConfig, BackoffConfig, ChannelConfig, ChannelMode, ValidationConfig};
pub use error::{ChannelError, ConfigError, Error, FetchError, Violation, ViolationKind};
pub use fetch::{GroupFetcher, SessionProvider, TimeoutFetcher};
pub use gate::{AccessGate, Admission};
pub use logging::CheckLog;
pub use policy::{AccessDecision, RequiredAccessDescriptor, evaluate};
pub use portal::{PortalGroupFetcher, PortalRequest, PortalTransport, parse_user_groups};
pub use principal::{GroupMembership, Principal};
pub use scheduler::{CheckOutcome, SkipReason, ValidationScheduler};
pub use session::{
    ACCESS_REVOKED_REASON, MemorySessionStore, PersistedSession, SessionOwner, SessionState,
    SessionStore,
};
pub use signal::AccessLostSignal;
pub use state::{SchedulerPhase, SchedulerStatus, ValidationState};
pub use token::PortalToken;
pub use trigger::{ActivityKind, Trigger, TriggerBus, TriggerEvent};
