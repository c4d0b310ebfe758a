//! Terminate-wait-verify loop over one Auto Scaling group.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::executor::TerminationExecutor;
use super::planner;
use super::poller::{CompletionPoller, PendingTermination, PollOutcome, PollSettings};
use super::probe::ReadinessProbe;
use super::resolver;
use crate::error::{Result, RollerError};
use crate::fleet::{FleetInspector, GroupFilter, InstanceTerminator, LaunchConfigId, inspect};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Inspecting,
    /// Waiting for an unstable group before the first termination.
    Settling,
    Planning,
    Terminating { instance_id: String },
    Polling { instance_id: String },
    Done,
    Failed,
}

/// One completed replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleRecord {
    pub cycle: usize,
    pub instance_id: String,
    pub launch_config: Option<LaunchConfigId>,
    pub launch_time: DateTime<Utc>,
    pub activity_id: Option<String>,
    pub terminated_at: DateTime<Utc>,
    /// The platform was already terminating the instance when asked.
    pub already_terminating: bool,
    pub poll_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeSummary {
    pub group: String,
    pub target: LaunchConfigId,
    /// Poll attempts spent waiting for an unstable group before the first termination.
    pub settle_attempts: Option<u32>,
    pub cycles: Vec<CycleRecord>,
}

impl UpgradeSummary {
    pub fn terminated(&self) -> Vec<&str> {
        self.cycles.iter().map(|c| c.instance_id.as_str()).collect()
    }
}

/// Drives the upgrade of a single group until no in-service member runs an
/// outdated configuration, or until something goes wrong.
///
/// Membership is re-fetched at the start of every cycle and nothing is
/// carried between runs, so a run may be restarted at any point.
pub struct Controller<'a> {
    inspector: &'a dyn FleetInspector,
    terminator: &'a dyn InstanceTerminator,
    probe: &'a dyn ReadinessProbe,
    filter: GroupFilter,
    settings: PollSettings,
    state: ControllerState,
    outstanding: Option<String>,
}

impl<'a> Controller<'a> {
    pub fn new(
        inspector: &'a dyn FleetInspector,
        terminator: &'a dyn InstanceTerminator,
        probe: &'a dyn ReadinessProbe,
        filter: GroupFilter,
        settings: PollSettings,
    ) -> Self {
        Self {
            inspector,
            terminator,
            probe,
            filter,
            settings,
            state: ControllerState::Idle,
            outstanding: None,
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Termination issued by this controller whose replacement was never
    /// observed as stable.
    pub fn outstanding(&self) -> Option<&str> {
        self.outstanding.as_deref()
    }

    pub async fn run(&mut self) -> Result<UpgradeSummary> {
        let poller = CompletionPoller::new(self.inspector, self.probe, self.settings);
        let executor = TerminationExecutor::new(self.terminator);

        self.transition(ControllerState::Inspecting);
        let mut snapshot = inspect(self.inspector, &self.filter)
            .await
            .map_err(|e| self.fail(e))?;

        // Later inspections target the resolved group only
        let resolved = GroupFilter::Exact(snapshot.group.name.clone());

        info!(
            group = %snapshot.group.name,
            target = %snapshot.group.target,
            min_size = snapshot.group.min_size,
            desired_capacity = snapshot.group.desired_capacity,
            members = snapshot.members.len(),
            "Inspected group"
        );

        let mut summary = UpgradeSummary {
            group: snapshot.group.name.clone(),
            target: snapshot.group.target.clone(),
            settle_attempts: None,
            cycles: Vec::new(),
        };

        if !resolver::resolve(&snapshot.group, &snapshot.members).is_empty()
            && !snapshot.meets_capacity()
        {
            warn!(
                group = %snapshot.group.name,
                in_service = snapshot.in_service_count(),
                members = snapshot.members.len(),
                desired_capacity = snapshot.group.desired_capacity,
                "Group is not stable, waiting before the first termination"
            );
            self.transition(ControllerState::Settling);
            let (settled, attempts) = poller
                .await_stable(&snapshot.group, None)
                .await
                .and_then(PollOutcome::into_stable)
                .map_err(|e| self.fail(e))?;
            info!(
                group = %settled.group.name,
                attempts = attempts,
                "Group settled"
            );
            summary.settle_attempts = Some(attempts);
            snapshot = settled;
        }

        loop {
            self.transition(ControllerState::Planning);
            let outdated = resolver::resolve(&snapshot.group, &snapshot.members);
            let Some(next) = planner::select_next(&outdated).cloned() else {
                self.transition(ControllerState::Done);
                info!(
                    group = %summary.group,
                    target = %summary.target,
                    terminated = summary.cycles.len(),
                    "No outdated members remain"
                );
                return Ok(summary);
            };

            debug!(
                group = %snapshot.group.name,
                outdated = outdated.len(),
                selected = %next.id,
                "Selected next member"
            );

            self.transition(ControllerState::Terminating {
                instance_id: next.id.clone(),
            });
            if let Some(pending) = &self.outstanding {
                let err = RollerError::TerminationOutstanding(pending.clone());
                return Err(self.fail(err));
            }

            let protected = resolver::up_to_date(&snapshot.group, &snapshot.members);
            // Outstanding from the moment the request is issued, not acknowledged
            self.outstanding = Some(next.id.clone());
            let handle = match executor.terminate(&next).await {
                Ok(handle) => handle,
                Err(e) => {
                    self.outstanding = None;
                    return Err(self.fail(e));
                }
            };

            self.transition(ControllerState::Polling {
                instance_id: handle.instance_id.clone(),
            });
            let pending = PendingTermination {
                instance_id: &handle.instance_id,
                protected: &protected,
            };
            let (_, attempts) = poller
                .await_stable(&snapshot.group, Some(pending))
                .await
                .and_then(PollOutcome::into_stable)
                .map_err(|e| self.fail(e))?;
            self.outstanding = None;

            let record = CycleRecord {
                cycle: summary.cycles.len() + 1,
                instance_id: handle.instance_id,
                launch_config: next.launch_config,
                launch_time: next.launch_time,
                activity_id: handle.activity_id,
                terminated_at: handle.issued_at,
                already_terminating: handle.already_terminating,
                poll_attempts: attempts,
            };
            info!(
                group = %summary.group,
                cycle = record.cycle,
                instance_id = %record.instance_id,
                poll_attempts = record.poll_attempts,
                remaining = outdated.len() - 1,
                "Replacement cycle complete"
            );
            summary.cycles.push(record);

            self.transition(ControllerState::Inspecting);
            snapshot = inspect(self.inspector, &resolved)
                .await
                .map_err(|e| self.fail(e))?;
        }
    }

    fn transition(&mut self, next: ControllerState) {
        debug!(from = ?self.state, to = ?next, "Controller state transition");
        self.state = next;
    }

    fn fail(&mut self, err: RollerError) -> RollerError {
        error!(
            error = %err,
            outstanding_termination = %self.outstanding.as_deref().unwrap_or("none"),
            "Rolling upgrade failed"
        );
        self.transition(ControllerState::Failed);
        err
    }
}
