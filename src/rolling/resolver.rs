//! Outdated set resolution.

use std::collections::BTreeSet;

use crate::fleet::{Group, Member};

/// In-service members not running the group's target configuration.
///
/// Empty means the upgrade is complete.
pub fn resolve(group: &Group, members: &[Member]) -> Vec<Member> {
    members
        .iter()
        .filter(|m| m.is_in_service() && !m.runs(&group.target))
        .cloned()
        .collect()
}

/// Ids of in-service members already running the target configuration.
pub fn up_to_date(group: &Group, members: &[Member]) -> BTreeSet<String> {
    members
        .iter()
        .filter(|m| m.is_in_service() && m.runs(&group.target))
        .map(|m| m.id.clone())
        .collect()
}
