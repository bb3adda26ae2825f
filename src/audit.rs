//! Audit trail for session and access events.
//!
//! This module provides:
//! - `AuditEvent`: structured record of a sign-in, restore, revocation or sign-out
//! - `AuditTrail`: in-memory recorder read by support tooling
//! - `emit`: structured tracing emission on the audit target
//!
//! Revocation records carry the principal's last-known groups so support
//! staff can see what the user held when access was cut.

mod emitter;
mod event;
mod trail;

pub use emitter::{AUDIT_TARGET, emit, emit_and_record};
pub use event::{AuditEvent, AuditEventKind, AuditOutcome};
pub use trail::AuditTrail;
