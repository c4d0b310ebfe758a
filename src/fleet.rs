//! Fleet model and the platform-facing query/command interfaces.

pub mod inspector;
pub mod terminator;
pub mod types;

pub use inspector::{AwsFleetInspector, FleetInspector, inspect};
pub use terminator::{AsgTerminator, InstanceTerminator, TerminationAck};
pub use types::{Group, GroupFilter, GroupSnapshot, LaunchConfigId, LifecycleState, Member};
