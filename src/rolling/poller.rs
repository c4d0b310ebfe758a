//! Bounded wait for a group to return to full service.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::probe::ReadinessProbe;
use crate::error::{Result, RollerError};
use crate::fleet::{FleetInspector, Group, GroupFilter, GroupSnapshot, inspect};

/// Poll interval and attempt bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_attempts: 40,
        }
    }
}

/// The termination a poll is waiting on.
#[derive(Debug, Clone, Copy)]
pub struct PendingTermination<'a> {
    pub instance_id: &'a str,
    /// Up-to-date members that were in service when the termination was issued.
    pub protected: &'a BTreeSet<String>,
}

#[derive(Debug)]
pub enum PollOutcome {
    Stable {
        snapshot: GroupSnapshot,
        attempts: u32,
    },
    TimedOut {
        snapshot: GroupSnapshot,
        attempts: u32,
    },
    QuorumBreach {
        snapshot: GroupSnapshot,
        in_service: usize,
        min_size: usize,
        lost: Vec<String>,
    },
}

impl PollOutcome {
    /// Snapshot and attempt count of a `Stable` outcome, the matching
    /// error otherwise.
    pub fn into_stable(self) -> Result<(GroupSnapshot, u32)> {
        match self {
            Self::Stable { snapshot, attempts } => Ok((snapshot, attempts)),
            Self::TimedOut { snapshot, attempts } => Err(RollerError::PollTimeout {
                attempts,
                snapshot: Box::new(snapshot),
            }),
            Self::QuorumBreach {
                snapshot,
                in_service,
                min_size,
                lost,
            } => Err(RollerError::QuorumBreach {
                in_service,
                min_size,
                lost,
                snapshot: Box::new(snapshot),
            }),
        }
    }
}

pub struct CompletionPoller<'a> {
    inspector: &'a dyn FleetInspector,
    probe: &'a dyn ReadinessProbe,
    settings: PollSettings,
}

impl<'a> CompletionPoller<'a> {
    pub fn new(
        inspector: &'a dyn FleetInspector,
        probe: &'a dyn ReadinessProbe,
        settings: PollSettings,
    ) -> Self {
        Self {
            inspector,
            probe,
            settings,
        }
    }

    /// Re-fetch the group until it is stable, sleeping between attempts.
    ///
    /// A snapshot is stable when desired capacity is in service, every member
    /// is in service and ready, the minimum is met, and the pending
    /// termination (if any) is no longer in service.
    ///
    /// While a termination is pending the poll reports `QuorumBreach` when a
    /// protected member leaves service, or when the in-service count (not
    /// counting the member being replaced) falls back below the minimum
    /// after having reached it.
    pub async fn await_stable(
        &self,
        group: &Group,
        pending: Option<PendingTermination<'_>>,
    ) -> Result<PollOutcome> {
        if self.settings.max_attempts == 0 {
            return Err(RollerError::InvalidConfig(
                "max_wait_attempts must be at least 1".to_string(),
            ));
        }

        let filter = GroupFilter::Exact(group.name.clone());
        let excluded = pending.map(|p| p.instance_id);
        let mut last_snapshot: Option<GroupSnapshot> = None;
        let mut last_error: Option<RollerError> = None;
        let mut quorum_reached = false;

        for attempt in 1..=self.settings.max_attempts {
            if attempt > 1 {
                sleep(self.settings.interval).await;
            }

            let snapshot = match inspect(self.inspector, &filter).await {
                Ok(snapshot) => snapshot,
                Err(e) if e.is_transient() => {
                    warn!(
                        group = %group.name,
                        attempt = attempt,
                        max_attempts = self.settings.max_attempts,
                        error = %e,
                        "Failed to inspect group, counting attempt"
                    );
                    last_error = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let in_service = snapshot.in_service_count_excluding(excluded);
            let min_size = snapshot.group.min_size;

            if let Some(pending) = pending {
                let lost: Vec<String> = pending
                    .protected
                    .iter()
                    .filter(|id| !snapshot.is_member_in_service(id))
                    .cloned()
                    .collect();

                if !lost.is_empty() || (quorum_reached && in_service < min_size) {
                    error!(
                        group = %group.name,
                        attempt = attempt,
                        in_service = in_service,
                        min_size = min_size,
                        lost = ?lost,
                        pending_instance_id = %pending.instance_id,
                        "Quorum breach while termination pending"
                    );
                    return Ok(PollOutcome::QuorumBreach {
                        snapshot,
                        in_service,
                        min_size,
                        lost,
                    });
                }
            }

            if in_service >= min_size {
                quorum_reached = true;
            }

            if self.is_stable(&snapshot, excluded).await {
                info!(
                    group = %group.name,
                    attempt = attempt,
                    in_service = snapshot.in_service_count(),
                    desired_capacity = snapshot.group.desired_capacity,
                    "Group is stable"
                );
                return Ok(PollOutcome::Stable { snapshot, attempts: attempt });
            }

            info!(
                group = %group.name,
                attempt = attempt,
                max_attempts = self.settings.max_attempts,
                in_service = snapshot.in_service_count(),
                members = snapshot.members.len(),
                desired_capacity = snapshot.group.desired_capacity,
                min_size = min_size,
                next_check_in_seconds = self.settings.interval.as_secs(),
                "Waiting for group to stabilize"
            );
            last_snapshot = Some(snapshot);
        }

        match last_snapshot {
            Some(snapshot) => {
                warn!(
                    group = %group.name,
                    attempts = self.settings.max_attempts,
                    "Group did not stabilize within the attempt limit"
                );
                Ok(PollOutcome::TimedOut {
                    snapshot,
                    attempts: self.settings.max_attempts,
                })
            }
            None => Err(last_error.unwrap_or_else(|| {
                RollerError::InvalidConfig("poll made no attempts".to_string())
            })),
        }
    }

    async fn is_stable(&self, snapshot: &GroupSnapshot, pending: Option<&str>) -> bool {
        if !snapshot.meets_capacity() {
            return false;
        }

        // The platform has not acted on the request yet
        if let Some(id) = pending
            && snapshot.is_member_in_service(id)
        {
            debug!(
                pending_instance_id = id,
                "Terminated member still reported in service"
            );
            return false;
        }

        for member in &snapshot.members {
            if !self.probe.is_ready(member).await {
                debug!(
                    instance_id = %member.id,
                    probe = self.probe.name(),
                    "Member not ready"
                );
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::{LifecycleState, Member};
    use crate::rolling::probe::AlwaysReady;
    use crate::testing::{SimulatedFleet, group, member, stale, target};
    use async_trait::async_trait;

    fn settings(max_attempts: u32) -> PollSettings {
        PollSettings {
            interval: Duration::ZERO,
            max_attempts,
        }
    }

    struct NeverReady;

    #[async_trait]
    impl ReadinessProbe for NeverReady {
        async fn is_ready(&self, _member: &Member) -> bool {
            false
        }

        fn name(&self) -> &str {
            "never"
        }
    }

    #[test]
    fn test_default_settings() {
        let defaults = PollSettings::default();
        assert_eq!(defaults.interval, Duration::from_secs(30));
        assert_eq!(defaults.max_attempts, 40);
    }

    #[tokio::test]
    async fn test_stable_immediately_when_full() {
        let g = group("zk", 3, 3);
        let fleet = SimulatedFleet::new(
            g.clone(),
            vec![
                member("i-1", Some(target()), 0, LifecycleState::InService),
                member("i-2", Some(target()), 1, LifecycleState::InService),
                member("i-3", Some(target()), 2, LifecycleState::InService),
            ],
        );
        let poller = CompletionPoller::new(&fleet, &AlwaysReady, settings(5));

        let outcome = poller.await_stable(&g, None).await.unwrap();

        assert!(matches!(outcome, PollOutcome::Stable { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_stable_after_replacement_boots() {
        let g = group("zk", 2, 3);
        let fleet = SimulatedFleet::new(
            g.clone(),
            vec![
                member("i-1", Some(stale()), 0, LifecycleState::Terminating),
                member("i-2", Some(target()), 1, LifecycleState::InService),
                member("i-3", Some(target()), 2, LifecycleState::InService),
            ],
        );
        let protected: BTreeSet<String> = ["i-2".to_string(), "i-3".to_string()].into();
        let pending = PendingTermination {
            instance_id: "i-1",
            protected: &protected,
        };
        let poller = CompletionPoller::new(&fleet, &AlwaysReady, settings(10));

        let outcome = poller.await_stable(&g, Some(pending)).await.unwrap();

        // terminating -> replacement pending -> replacement in service
        match outcome {
            PollOutcome::Stable { snapshot, attempts } => {
                assert_eq!(attempts, 3);
                assert!(snapshot.member("i-1").is_none());
                assert_eq!(snapshot.in_service_count(), 3);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_not_stable_while_target_still_in_service() {
        let g = group("zk", 1, 2);
        let fleet = SimulatedFleet::new(
            g.clone(),
            vec![
                member("i-1", Some(stale()), 0, LifecycleState::InService),
                member("i-2", Some(target()), 1, LifecycleState::InService),
            ],
        );
        let protected = BTreeSet::new();
        let pending = PendingTermination {
            instance_id: "i-1",
            protected: &protected,
        };
        let poller = CompletionPoller::new(&fleet, &AlwaysReady, settings(3));

        let outcome = poller.await_stable(&g, Some(pending)).await.unwrap();

        assert!(matches!(outcome, PollOutcome::TimedOut { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_timeout_when_minimum_never_reached() {
        let g = group("zk", 3, 3);
        let fleet = SimulatedFleet::new(
            g.clone(),
            vec![
                member("i-1", Some(stale()), 0, LifecycleState::Terminating),
                member("i-2", Some(stale()), 1, LifecycleState::InService),
                member("i-3", Some(stale()), 2, LifecycleState::InService),
            ],
        )
        .without_replacements();
        let protected = BTreeSet::new();
        let pending = PendingTermination {
            instance_id: "i-1",
            protected: &protected,
        };
        let poller = CompletionPoller::new(&fleet, &AlwaysReady, settings(4));

        let outcome = poller.await_stable(&g, Some(pending)).await.unwrap();

        match outcome {
            PollOutcome::TimedOut { snapshot, attempts } => {
                assert_eq!(attempts, 4);
                assert_eq!(snapshot.in_service_count(), 2);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(fleet.list_calls(), 4);
    }

    #[tokio::test]
    async fn test_breach_when_protected_member_lost() {
        let g = group("zk", 2, 3);
        let fleet = SimulatedFleet::new(
            g.clone(),
            vec![
                member("i-1", Some(stale()), 0, LifecycleState::Terminating),
                member("i-2", Some(target()), 1, LifecycleState::InService),
                member("i-3", Some(target()), 2, LifecycleState::InService),
            ],
        )
        .losing_after(1, "i-2");
        let protected: BTreeSet<String> = ["i-2".to_string(), "i-3".to_string()].into();
        let pending = PendingTermination {
            instance_id: "i-1",
            protected: &protected,
        };
        let poller = CompletionPoller::new(&fleet, &AlwaysReady, settings(10));

        let outcome = poller.await_stable(&g, Some(pending)).await.unwrap();

        match outcome {
            PollOutcome::QuorumBreach { lost, .. } => assert_eq!(lost, vec!["i-2"]),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_breach_when_count_falls_back_below_minimum() {
        let g = group("zk", 2, 3);
        let fleet = SimulatedFleet::new(
            g.clone(),
            vec![
                member("i-1", Some(stale()), 0, LifecycleState::Terminating),
                member("i-2", Some(stale()), 1, LifecycleState::InService),
                member("i-3", Some(stale()), 2, LifecycleState::InService),
            ],
        )
        .without_replacements()
        .losing_after(2, "i-3");
        let protected = BTreeSet::new();
        let pending = PendingTermination {
            instance_id: "i-1",
            protected: &protected,
        };
        let poller = CompletionPoller::new(&fleet, &AlwaysReady, settings(10));

        let outcome = poller.await_stable(&g, Some(pending)).await.unwrap();

        match outcome {
            PollOutcome::QuorumBreach {
                in_service,
                min_size,
                lost,
                ..
            } => {
                assert_eq!(in_service, 1);
                assert_eq!(min_size, 2);
                assert!(lost.is_empty());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(fleet.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_probe_blocks_stability() {
        let g = group("zk", 1, 1);
        let fleet = SimulatedFleet::new(
            g.clone(),
            vec![member("i-1", Some(target()), 0, LifecycleState::InService)],
        );
        let poller = CompletionPoller::new(&fleet, &NeverReady, settings(2));

        let outcome = poller.await_stable(&g, None).await.unwrap();

        assert!(matches!(outcome, PollOutcome::TimedOut { attempts: 2, .. }));
    }

    fn api_unavailable() -> RollerError {
        RollerError::AwsSdk(
            "fleet::inspector".to_string(),
            "service unavailable".to_string(),
        )
    }

    fn credentials_expired() -> RollerError {
        RollerError::AwsCredentials(
            "fleet::inspector".to_string(),
            "ExpiredToken".to_string(),
        )
    }

    #[tokio::test]
    async fn test_transient_error_counts_as_attempt() {
        let g = group("zk", 2, 2);
        let fleet = SimulatedFleet::new(
            g.clone(),
            vec![
                member("i-1", Some(target()), 0, LifecycleState::InService),
                member("i-2", Some(target()), 1, LifecycleState::InService),
            ],
        )
        .failing_lists(1, api_unavailable);
        let poller = CompletionPoller::new(&fleet, &AlwaysReady, settings(5));

        let outcome = poller.await_stable(&g, None).await.unwrap();

        assert!(matches!(outcome, PollOutcome::Stable { attempts: 2, .. }));
        assert_eq!(fleet.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_transient_errors_exhaust_attempts() {
        let g = group("zk", 1, 1);
        let fleet = SimulatedFleet::new(
            g.clone(),
            vec![member("i-1", Some(target()), 0, LifecycleState::InService)],
        )
        .failing_lists(10, api_unavailable);
        let poller = CompletionPoller::new(&fleet, &AlwaysReady, settings(3));

        let err = poller.await_stable(&g, None).await.unwrap_err();

        assert!(matches!(err, RollerError::AwsSdk(_, _)));
        assert_eq!(fleet.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_non_transient_error_aborts_polling() {
        let g = group("zk", 1, 1);
        let fleet = SimulatedFleet::new(
            g.clone(),
            vec![member("i-1", Some(target()), 0, LifecycleState::InService)],
        )
        .failing_lists(1, credentials_expired);
        let poller = CompletionPoller::new(&fleet, &AlwaysReady, settings(5));

        let err = poller.await_stable(&g, None).await.unwrap_err();

        assert!(matches!(err, RollerError::AwsCredentials(_, _)));
        assert_eq!(fleet.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_rejected() {
        let g = group("zk", 1, 1);
        let fleet = SimulatedFleet::new(g.clone(), vec![]);
        let poller = CompletionPoller::new(&fleet, &AlwaysReady, settings(0));

        let err = poller.await_stable(&g, None).await.unwrap_err();

        assert!(matches!(err, RollerError::InvalidConfig(_)));
        assert_eq!(fleet.list_calls(), 0);
    }

    #[test]
    fn test_outcome_into_stable() {
        let snap = crate::testing::snapshot(group("zk", 1, 1), vec![]);
        let stable = PollOutcome::Stable {
            snapshot: snap.clone(),
            attempts: 2,
        };
        let (snapshot, attempts) = stable.into_stable().unwrap();
        assert_eq!(snapshot.group.name, "zk");
        assert_eq!(attempts, 2);

        let timed_out = PollOutcome::TimedOut {
            snapshot: snap.clone(),
            attempts: 7,
        };
        assert!(matches!(
            timed_out.into_stable(),
            Err(RollerError::PollTimeout { attempts: 7, .. })
        ));

        let breach = PollOutcome::QuorumBreach {
            snapshot: snap,
            in_service: 0,
            min_size: 1,
            lost: vec![],
        };
        assert!(matches!(
            breach.into_stable(),
            Err(RollerError::QuorumBreach { min_size: 1, .. })
        ));
    }
}
