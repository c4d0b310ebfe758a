//! In-memory fleet used by unit tests.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::error::{Result, RollerError};
use crate::fleet::{
    FleetInspector, Group, GroupFilter, GroupSnapshot, InstanceTerminator, LaunchConfigId,
    LifecycleState, Member, TerminationAck,
};

pub fn target() -> LaunchConfigId {
    LaunchConfigId::configuration("lc-v2")
}

pub fn stale() -> LaunchConfigId {
    LaunchConfigId::configuration("lc-v1")
}

pub fn launched_at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
}

pub fn group(name: &str, min_size: usize, desired_capacity: usize) -> Group {
    Group {
        name: name.to_string(),
        target: target(),
        min_size,
        max_size: desired_capacity + 1,
        desired_capacity,
    }
}

pub fn member(
    id: &str,
    launch_config: Option<LaunchConfigId>,
    minutes: i64,
    state: LifecycleState,
) -> Member {
    Member::new(id, launch_config, launched_at(minutes), state)
}

pub fn snapshot(group: Group, members: Vec<Member>) -> GroupSnapshot {
    GroupSnapshot { group, members }
}

/// A group whose members move through their lifecycle each time the
/// membership is listed.
///
/// Every `list_members` call returns the current state and then advances it:
/// pending members come into service, terminating members disappear and a
/// replacement running the target configuration is launched as pending.
pub struct SimulatedFleet {
    groups: Vec<Group>,
    state: Mutex<SimState>,
}

struct SimState {
    members: Vec<Member>,
    list_calls: u32,
    next_instance: u32,
    boot_replacements: bool,
    lose_after: Option<(u32, String)>,
    failing: Option<(u32, fn() -> RollerError)>,
    reject: HashSet<String>,
    terminations: Vec<String>,
}

impl SimulatedFleet {
    pub fn new(group: Group, members: Vec<Member>) -> Self {
        Self {
            groups: vec![group],
            state: Mutex::new(SimState {
                members,
                list_calls: 0,
                next_instance: 100,
                boot_replacements: true,
                lose_after: None,
                failing: None,
                reject: HashSet::new(),
                terminations: Vec::new(),
            }),
        }
    }

    /// Another group visible to name resolution (with no members of its own).
    pub fn with_extra_group(mut self, group: Group) -> Self {
        self.groups.push(group);
        self
    }

    /// Replacements are never launched and pending members never boot.
    pub fn without_replacements(self) -> Self {
        self.state.lock().unwrap().boot_replacements = false;
        self
    }

    /// Remove `instance_id` from the group right after list call number `call`.
    pub fn losing_after(self, call: u32, instance_id: &str) -> Self {
        self.state.lock().unwrap().lose_after = Some((call, instance_id.to_string()));
        self
    }

    /// The next `calls` list calls fail with a fresh `error()` and leave the
    /// fleet untouched.
    pub fn failing_lists(self, calls: u32, error: fn() -> RollerError) -> Self {
        self.state.lock().unwrap().failing = Some((calls, error));
        self
    }

    pub fn rejecting(self, instance_id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .reject
            .insert(instance_id.to_string());
        self
    }

    /// Ids of every termination request received, in order.
    pub fn terminations(&self) -> Vec<String> {
        self.state.lock().unwrap().terminations.clone()
    }

    pub fn list_calls(&self) -> u32 {
        self.state.lock().unwrap().list_calls
    }

    pub fn members(&self) -> Vec<Member> {
        self.state.lock().unwrap().members.clone()
    }

    fn advance(state: &mut SimState, target: &LaunchConfigId) {
        if state.boot_replacements {
            for m in state
                .members
                .iter_mut()
                .filter(|m| m.state == LifecycleState::Pending)
            {
                m.state = LifecycleState::InService;
            }
        }

        let leaving = state
            .members
            .iter()
            .filter(|m| m.state == LifecycleState::Terminating)
            .count();
        state
            .members
            .retain(|m| m.state != LifecycleState::Terminating);

        if state.boot_replacements {
            for _ in 0..leaving {
                state.next_instance += 1;
                let id = format!("i-{}", state.next_instance);
                let minutes = 1_000 + i64::from(state.next_instance);
                state.members.push(member(
                    &id,
                    Some(target.clone()),
                    minutes,
                    LifecycleState::Pending,
                ));
            }
        }

        if let Some((call, id)) = &state.lose_after
            && *call == state.list_calls
        {
            let id = id.clone();
            state.members.retain(|m| m.id != id);
        }
    }
}

#[async_trait]
impl FleetInspector for SimulatedFleet {
    async fn resolve_group(&self, filter: &GroupFilter) -> Result<Group> {
        let matched: Vec<&Group> = self.groups.iter().filter(|g| filter.matches(&g.name)).collect();
        if matched.len() != 1 {
            return Err(RollerError::GroupResolution {
                filter: filter.to_string(),
                matched: matched.iter().map(|g| g.name.clone()).collect(),
            });
        }
        Ok(matched[0].clone())
    }

    async fn list_members(&self, group: &Group) -> Result<Vec<Member>> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        if let Some((remaining, error)) = state.failing.as_mut()
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(error());
        }
        let members = state.members.clone();
        Self::advance(&mut state, &group.target);
        Ok(members)
    }
}

#[async_trait]
impl InstanceTerminator for SimulatedFleet {
    async fn terminate(&self, instance_id: &str) -> Result<TerminationAck> {
        let mut state = self.state.lock().unwrap();
        state.terminations.push(instance_id.to_string());

        if state.reject.contains(instance_id) {
            return Err(RollerError::Termination {
                instance_id: instance_id.to_string(),
                reason: "not authorized to terminate".to_string(),
            });
        }

        match state.members.iter_mut().find(|m| m.id == instance_id) {
            Some(m) => {
                m.state = LifecycleState::Terminating;
                Ok(TerminationAck {
                    activity_id: Some(format!("activity-{}", instance_id)),
                    already_terminating: false,
                })
            }
            None => Err(RollerError::Termination {
                instance_id: instance_id.to_string(),
                reason: "Instance Id not found".to_string(),
            }),
        }
    }
}
