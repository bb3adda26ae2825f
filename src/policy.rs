//! Access policy evaluation.
//!
//! [`evaluate`] is a pure function: no I/O, no mutation, deterministic. It is
//! called on every revalidation and its result is never cached, because
//! membership can change on the portal at any time.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Which group membership grants access.
///
/// Static configuration, immutable for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequiredAccessDescriptor {
    /// Authoritative group identifier
    pub required_group_id: String,
    /// Legacy human-readable group names that are also accepted
    pub acceptable_group_names: Vec<String>,
    /// When false every principal is granted
    pub enforce: bool,
}

impl Default for RequiredAccessDescriptor {
    fn default() -> Self {
        Self {
            required_group_id: String::new(),
            acceptable_group_names: Vec::new(),
            enforce: true,
        }
    }
}

impl RequiredAccessDescriptor {
    /// Creates an enforcing descriptor.
    pub fn new<N>(required_group_id: impl Into<String>, acceptable_group_names: N) -> Self
    where
        N: IntoIterator,
        N::Item: Into<String>,
    {
        Self {
            required_group_id: required_group_id.into(),
            acceptable_group_names: acceptable_group_names.into_iter().map(Into::into).collect(),
            enforce: true,
        }
    }

    /// Disables enforcement. Only for non-production shortcut paths.
    pub fn unenforced(mut self) -> Self {
        self.enforce = false;
        self
    }
}

/// Outcome of evaluating a principal's groups against the descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    /// Whether access is granted
    pub granted: bool,
    /// Set when the authoritative id matched
    pub matched_group_id: Option<String>,
    /// Set when only a legacy name matched
    pub matched_group_name: Option<String>,
}

impl AccessDecision {
    fn denied() -> Self {
        Self {
            granted: false,
            matched_group_id: None,
            matched_group_name: None,
        }
    }

    fn unenforced() -> Self {
        Self {
            granted: true,
            matched_group_id: None,
            matched_group_name: None,
        }
    }
}

/// Decides access for a set of group ids and names.
///
/// An id match is authoritative and wins the report even if a name also
/// matches. A name-only match is accepted as secondary proof.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeSet;
/// use sirius_access::{evaluate, RequiredAccessDescriptor};
///
/// let descriptor = RequiredAccessDescriptor::new("G1", ["Sirius Users"]);
/// let ids: BTreeSet<String> = ["G2".to_string()].into();
/// let names: BTreeSet<String> = ["Sirius Users".to_string()].into();
///
/// let decision = evaluate(&ids, &names, &descriptor);
/// assert!(decision.granted);
/// assert_eq!(decision.matched_group_name.as_deref(), Some("Sirius Users"));
/// ```
pub fn evaluate(
    group_ids: &BTreeSet<String>,
    group_names: &BTreeSet<String>,
    descriptor: &RequiredAccessDescriptor,
) -> AccessDecision {
    if !descriptor.enforce {
        return AccessDecision::unenforced();
    }

    if !descriptor.required_group_id.is_empty()
        && group_ids.contains(&descriptor.required_group_id)
    {
        return AccessDecision {
            granted: true,
            matched_group_id: Some(descriptor.required_group_id.clone()),
            matched_group_name: None,
        };
    }

    let matched_name = descriptor
        .acceptable_group_names
        .iter()
        .find(|name| group_names.contains(*name));

    match matched_name {
        Some(name) => AccessDecision {
            granted: true,
            matched_group_id: None,
            matched_group_name: Some(name.clone()),
        },
        None => AccessDecision::denied(),
    }
}
