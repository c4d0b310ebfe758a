//! Oldest-first termination ordering.

use std::cmp::Ordering;

use crate::fleet::Member;

/// Total order: launch time, then instance id.
fn termination_order(a: &Member, b: &Member) -> Ordering {
    a.launch_time
        .cmp(&b.launch_time)
        .then_with(|| a.id.cmp(&b.id))
}

/// The member to terminate next, or `None` when nothing is outdated.
pub fn select_next(outdated: &[Member]) -> Option<&Member> {
    outdated.iter().min_by(|a, b| termination_order(a, b))
}

/// Full termination order for the current outdated set.
pub fn order(outdated: &[Member]) -> Vec<Member> {
    let mut ordered = outdated.to_vec();
    ordered.sort_by(termination_order);
    ordered
}
