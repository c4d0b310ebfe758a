//! Instance termination command interface.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::aws::retry::with_backoff;
use crate::aws::{AwsClients, Backoff};
use crate::error::{Result, RollerError};

/// Platform acknowledgement of a termination request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminationAck {
    /// Scaling activity started by the request, when the platform reports one.
    pub activity_id: Option<String>,
    /// The instance was already on its way out; nothing new was issued.
    pub already_terminating: bool,
}

/// Command interface: terminate one instance.
#[async_trait]
pub trait InstanceTerminator: Send + Sync {
    /// Fails with `RollerError::Termination` when the platform rejects the request.
    async fn terminate(&self, instance_id: &str) -> Result<TerminationAck>;
}

/// Terminates through the Auto Scaling API without decrementing desired
/// capacity, so the group launches a replacement from its current
/// launch configuration.
pub struct AsgTerminator {
    clients: AwsClients,
    backoff: Backoff,
}

impl AsgTerminator {
    pub fn new(clients: &AwsClients) -> Self {
        Self {
            clients: clients.clone(),
            backoff: Backoff::default(),
        }
    }
}

#[async_trait]
impl InstanceTerminator for AsgTerminator {
    async fn terminate(&self, instance_id: &str) -> Result<TerminationAck> {
        info!(
            instance_id = %instance_id,
            region = %self.clients.region(),
            api_action = "TerminateInstanceInAutoScalingGroup",
            "Sending termination request"
        );

        let result = with_backoff(&self.backoff, "TerminateInstanceInAutoScalingGroup", || {
            let request = self
                .clients
                .asg
                .terminate_instance_in_auto_scaling_group()
                .instance_id(instance_id)
                .should_decrement_desired_capacity(false);
            async move {
                request
                    .send()
                    .await
                    .map_err(|e| RollerError::aws(module_path!(), e))
            }
        })
        .await;

        match result {
            Ok(response) => Ok(TerminationAck {
                activity_id: response
                    .activity()
                    .and_then(|a| a.activity_id())
                    .map(|s| s.to_string()),
                already_terminating: false,
            }),
            Err(e) => {
                let reason = e.to_string();
                if is_already_terminating(&reason) {
                    warn!(
                        instance_id = %instance_id,
                        reason = %reason,
                        "Instance is already terminating, treating request as acknowledged"
                    );
                    return Ok(TerminationAck {
                        activity_id: None,
                        already_terminating: true,
                    });
                }
                Err(RollerError::Termination {
                    instance_id: instance_id.to_string(),
                    reason,
                })
            }
        }
    }
}

/// Whether a rejection only says the instance is already being terminated.
fn is_already_terminating(reason: &str) -> bool {
    let reason = reason.to_lowercase();
    reason.contains("already terminat")
        || reason.contains("is terminating")
        || reason.contains("in terminating state")
}
