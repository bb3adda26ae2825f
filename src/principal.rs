use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// The authenticated portal user and their group-membership claims.
///
/// Owned by the session: replaced wholesale on sign-in and dropped on
/// sign-out. The group sets are a snapshot taken at sign-in and are never
/// trusted by the revalidation path, which always refetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable identifier (portal username)
    pub id: String,
    /// Display name
    pub name: String,
    /// Group membership as of sign-in
    #[serde(default)]
    pub groups: GroupMembership,
}

impl Principal {
    /// Creates a principal with no known group membership.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            groups: GroupMembership::default(),
        }
    }

    /// Attaches a group membership snapshot.
    pub fn with_groups(mut self, groups: GroupMembership) -> Self {
        self.groups = groups;
        self
    }
}

/// Group identifiers and display names held by a principal.
///
/// Ids are authoritative. Names are human-readable and may be stale or
/// duplicated across groups; duplicates collapse in the set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembership {
    /// Stable group identifiers
    #[serde(default)]
    pub group_ids: BTreeSet<String>,
    /// Human-readable group titles
    #[serde(default)]
    pub group_names: BTreeSet<String>,
}

impl GroupMembership {
    /// Builds a membership from any iterables of ids and names.
    pub fn new<I, N>(ids: I, names: N) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        N: IntoIterator,
        N::Item: Into<String>,
    {
        Self {
            group_ids: ids.into_iter().map(Into::into).collect(),
            group_names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true when neither ids nor names are present.
    pub fn is_empty(&self) -> bool {
        self.group_ids.is_empty() && self.group_names.is_empty()
    }

    /// Group names in stable order, for audit records.
    pub fn names(&self) -> Vec<String> {
        self.group_names.iter().cloned().collect()
    }
}
