//! Single-instance termination.

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::error::Result;
use crate::fleet::{InstanceTerminator, Member};

/// A termination the platform accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationHandle {
    pub instance_id: String,
    pub activity_id: Option<String>,
    pub already_terminating: bool,
    pub issued_at: DateTime<Utc>,
}

/// Issues exactly one termination per call and keeps no state of its own;
/// the controller guarantees no other termination is outstanding.
pub struct TerminationExecutor<'a> {
    terminator: &'a dyn InstanceTerminator,
}

impl<'a> TerminationExecutor<'a> {
    pub fn new(terminator: &'a dyn InstanceTerminator) -> Self {
        Self { terminator }
    }

    pub async fn terminate(&self, member: &Member) -> Result<TerminationHandle> {
        info!(
            instance_id = %member.id,
            launch_config = %member.launch_config_label(),
            launch_time = %member.launch_time.to_rfc3339(),
            availability_zone = %member.availability_zone.as_deref().unwrap_or("N/A"),
            action = "terminate",
            "Terminating oldest outdated member"
        );

        match self.terminator.terminate(&member.id).await {
            Ok(ack) => {
                info!(
                    instance_id = %member.id,
                    activity_id = %ack.activity_id.as_deref().unwrap_or("N/A"),
                    already_terminating = ack.already_terminating,
                    action = "terminate",
                    result = "accepted",
                    "Termination accepted"
                );
                Ok(TerminationHandle {
                    instance_id: member.id.clone(),
                    activity_id: ack.activity_id,
                    already_terminating: ack.already_terminating,
                    issued_at: Utc::now(),
                })
            }
            Err(e) => {
                error!(
                    instance_id = %member.id,
                    error = %e,
                    action = "terminate",
                    result = "rejected",
                    "Termination rejected"
                );
                Err(e)
            }
        }
    }
}
