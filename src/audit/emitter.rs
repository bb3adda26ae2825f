//! Emission of audit events through `tracing`.

use super::{AuditEvent, AuditTrail};

/// Tracing target carrying audit records.
pub const AUDIT_TARGET: &str = "sirius_access::audit";

/// Emits an audit event as a structured tracing event on [`AUDIT_TARGET`].
pub fn emit(event: &AuditEvent) {
    tracing::info!(
        target: AUDIT_TARGET,
        principal = ?event.principal(),
        kind = %event.kind(),
        outcome = %event.outcome(),
        matched_group = ?event.matched_group(),
        reason = ?event.reason(),
        groups = ?event.groups(),
        "audit event"
    );
}

/// Emits an audit event and records it to `trail`.
pub fn emit_and_record(event: AuditEvent, trail: &AuditTrail) {
    emit(&event);
    trail.record(event);
}
