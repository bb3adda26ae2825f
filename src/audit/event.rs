//! Audit event schema.
//!
//! Events carry identifiers and group names only. Tokens never enter an
//! audit record.

use std::fmt;

/// Kind of session or access event being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEventKind {
    /// Sign-in admission decision
    SignIn,
    /// Session restored from persisted state
    SessionRestored,
    /// Access revoked while the session was live
    AccessRevoked,
    /// Explicit sign-out
    SignOut,
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditEventKind::SignIn => write!(f, "sign_in"),
            AuditEventKind::SessionRestored => write!(f, "session_restored"),
            AuditEventKind::AccessRevoked => write!(f, "access_revoked"),
            AuditEventKind::SignOut => write!(f, "sign_out"),
        }
    }
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    /// Operation succeeded
    Success,
    /// Operation was denied by policy
    Denied,
    /// Operation failed due to error
    Error,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditOutcome::Success => write!(f, "success"),
            AuditOutcome::Denied => write!(f, "denied"),
            AuditOutcome::Error => write!(f, "error"),
        }
    }
}

/// A structured audit event.
///
/// # Example
///
/// ```
/// use sirius_access::audit::{AuditEvent, AuditEventKind, AuditOutcome};
///
/// let event = AuditEvent::new(Some("amir"), AuditEventKind::AccessRevoked, AuditOutcome::Denied)
///     .with_reason("removed from required group")
///     .with_groups(vec!["Field Ops".to_string()]);
///
/// assert_eq!(event.principal(), Some("amir"));
/// assert_eq!(event.groups(), ["Field Ops".to_string()]);
/// ```
#[derive(Debug, Clone)]
pub struct AuditEvent {
    principal: Option<String>,
    kind: AuditEventKind,
    outcome: AuditOutcome,
    /// Human-readable explanation shown to support staff
    reason: Option<String>,
    /// Group that admitted the principal, id or legacy name
    matched_group: Option<String>,
    /// Last-known group names
    groups: Vec<String>,
}

impl AuditEvent {
    /// Creates a new audit event with required fields.
    pub fn new(
        principal: Option<impl Into<String>>,
        kind: AuditEventKind,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            principal: principal.map(Into::into),
            kind,
            outcome,
            reason: None,
            matched_group: None,
            groups: Vec::new(),
        }
    }

    /// Sets the reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Sets the group that granted access.
    pub fn with_matched_group(mut self, group: impl Into<String>) -> Self {
        self.matched_group = Some(group.into());
        self
    }

    /// Sets the last-known group names.
    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    /// Returns the principal, if known.
    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    /// Returns the event kind.
    pub fn kind(&self) -> AuditEventKind {
        self.kind
    }

    /// Returns the operation outcome.
    pub fn outcome(&self) -> AuditOutcome {
        self.outcome
    }

    /// Returns the reason, if set.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Returns the matched group, if set.
    pub fn matched_group(&self) -> Option<&str> {
        self.matched_group.as_deref()
    }

    /// Returns the last-known group names.
    pub fn groups(&self) -> &[String] {
        &self.groups
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AuditEvent[kind={}, outcome={}, principal={}",
            self.kind,
            self.outcome,
            self.principal.as_deref().unwrap_or("<none>")
        )?;

        if let Some(group) = &self.matched_group {
            write!(f, ", matched_group={}", group)?;
        }
        if let Some(reason) = &self.reason {
            write!(f, ", reason={}", reason)?;
        }
        if !self.groups.is_empty() {
            write!(f, ", groups=[{}]", self.groups.join(", "))?;
        }

        write!(f, "]")
    }
}
