//! Permission matching and effective permission sets
//!
//! Wildcards are resolved at check time, never at aggregation time. A check for
//! `resource:action` succeeds against an exact grant, a `resource:*` grant, or the
//! global `*`, in that order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The global wildcard permission
pub const GLOBAL_WILDCARD: &str = "*";

/// Grants that turn every plain permission check into an automatic allow
pub const ADMIN_WILDCARD_PERMISSIONS: [&str; 6] = [
    "users:*",
    "roles:*",
    "permissions:*",
    "system:*",
    "admin:*",
    GLOBAL_WILDCARD,
];

/// Check whether a single granted permission covers the required one
pub fn permission_matches(granted: &str, required: &str) -> bool {
    if granted == required || granted == GLOBAL_WILDCARD {
        return true;
    }

    match (granted.strip_suffix(":*"), required.split_once(':')) {
        (Some(granted_resource), Some((required_resource, _))) => {
            granted_resource == required_resource
        }
        _ => false,
    }
}

/// Set of permission names reachable from a user's effective role assignments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectivePermissions {
    names: BTreeSet<String>,
}

impl EffectivePermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        self.names.insert(name.into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.names.iter()
    }

    /// Exact, then `resource:*`, then global `*`
    pub fn allows(&self, required: &str) -> bool {
        self.names.contains(required)
            || self
                .names
                .iter()
                .any(|granted| permission_matches(granted, required))
    }

    /// Any grant that matches an admin wildcard pattern
    pub fn has_admin_wildcard(&self) -> bool {
        ADMIN_WILDCARD_PERMISSIONS
            .iter()
            .any(|pattern| self.names.contains(*pattern))
    }

    pub fn is_subset(&self, other: &EffectivePermissions) -> bool {
        self.names.is_subset(&other.names)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.names.iter().cloned().collect()
    }
}

impl FromIterator<String> for EffectivePermissions {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().collect(),
        }
    }
}

impl<'a> FromIterator<&'a str> for EffectivePermissions {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        iter.into_iter().map(str::to_string).collect()
    }
}

impl Extend<String> for EffectivePermissions {
    fn extend<I: IntoIterator<Item = String>>(&mut self, iter: I) {
        self.names.extend(iter);
    }
}
