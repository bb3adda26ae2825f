use crate::{
    error::{Violation, ViolationKind},
    policy::{AccessDecision, RequiredAccessDescriptor, evaluate},
    principal::Principal,
};

/// Sign-in admission gate.
///
/// `AccessGate` is the only way to obtain an [`Admission`]. It evaluates the
/// principal's sign-in group snapshot once; continuous revalidation after
/// that is the scheduler's job.
///
/// # Examples
///
/// ```
/// use sirius_access::{AccessGate, GroupMembership, Principal, RequiredAccessDescriptor};
///
/// let descriptor = RequiredAccessDescriptor::new("G1", ["Sirius Users"]);
/// let principal = Principal::new("amir", "Amir")
///     .with_groups(GroupMembership::new(["G1"], ["Sirius Users"]));
///
/// let admission = AccessGate::new(Some(principal), &descriptor)
///     .admit()
///     .expect("member of G1");
///
/// assert_eq!(admission.decision.matched_group_id.as_deref(), Some("G1"));
/// ```
pub struct AccessGate<'a> {
    principal: Option<Principal>,
    descriptor: &'a RequiredAccessDescriptor,
}

/// A principal that passed the gate, with the decision that admitted it.
#[derive(Debug, Clone)]
pub struct Admission {
    /// The admitted principal
    pub principal: Principal,
    /// Why it was admitted
    pub decision: AccessDecision,
}

impl<'a> AccessGate<'a> {
    /// Creates a gate for the given principal.
    pub fn new(principal: Option<Principal>, descriptor: &'a RequiredAccessDescriptor) -> Self {
        Self {
            principal,
            descriptor,
        }
    }

    /// Validates the principal against the descriptor.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` when there is no principal, and
    /// `MissingRequiredGroup` when the snapshot fails the descriptor.
    pub fn admit(self) -> Result<Admission, Violation> {
        let Some(principal) = self.principal else {
            return Err(Violation::new(
                ViolationKind::Unauthenticated,
                "Authentication required",
            ));
        };

        let decision = evaluate(
            &principal.groups.group_ids,
            &principal.groups.group_names,
            self.descriptor,
        );

        if !decision.granted {
            return Err(Violation::new(
                ViolationKind::MissingRequiredGroup {
                    required_group_id: self.descriptor.required_group_id.clone(),
                },
                format!(
                    "User '{}' is not a member of the required group",
                    principal.id
                ),
            ));
        }

        Ok(Admission {
            principal,
            decision,
        })
    }
}
