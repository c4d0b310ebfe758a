//! Fleet data model shared by the inspector, the rolling core and output.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Identifies the image/configuration an instance was launched from.
///
/// Launch template versions are always concrete numbers here; `$Latest` and
/// `$Default` are resolved when the group is inspected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LaunchConfigId {
    LaunchConfiguration { name: String },
    LaunchTemplate { id: String, version: String },
}

impl LaunchConfigId {
    pub fn configuration(name: impl Into<String>) -> Self {
        Self::LaunchConfiguration { name: name.into() }
    }

    pub fn template(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self::LaunchTemplate {
            id: id.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for LaunchConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LaunchConfiguration { name } => write!(f, "lc/{}", name),
            Self::LaunchTemplate { id, version } => write!(f, "lt/{}:{}", id, version),
        }
    }
}

/// Member lifecycle as seen by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    Pending,
    InService,
    Terminating,
    Terminated,
    Unhealthy,
    /// Kept in the group but out of service (standby, detaching, warm pool).
    Standby,
}

impl LifecycleState {
    /// Map Auto Scaling lifecycle and health strings onto a state.
    pub fn from_platform(lifecycle: &str, health: Option<&str>) -> Self {
        match lifecycle {
            "InService" => match health {
                Some(h) if !h.eq_ignore_ascii_case("healthy") => Self::Unhealthy,
                _ => Self::InService,
            },
            "Terminated" => Self::Terminated,
            "Quarantined" => Self::Pending,
            s if s.starts_with("Pending") => Self::Pending,
            s if s.starts_with("Terminating") => Self::Terminating,
            _ => Self::Standby,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InService => "in-service",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
            Self::Unhealthy => "unhealthy",
            Self::Standby => "standby",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One instance of an Auto Scaling group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    pub id: String,
    pub launch_config: Option<LaunchConfigId>,
    pub launch_time: DateTime<Utc>,
    pub state: LifecycleState,
    pub availability_zone: Option<String>,
    pub private_ip: Option<String>,
}

impl Member {
    pub fn new(
        id: impl Into<String>,
        launch_config: Option<LaunchConfigId>,
        launch_time: DateTime<Utc>,
        state: LifecycleState,
    ) -> Self {
        Self {
            id: id.into(),
            launch_config,
            launch_time,
            state,
            availability_zone: None,
            private_ip: None,
        }
    }

    pub fn is_in_service(&self) -> bool {
        self.state == LifecycleState::InService
    }

    pub fn runs(&self, target: &LaunchConfigId) -> bool {
        self.launch_config.as_ref() == Some(target)
    }

    pub fn launch_config_label(&self) -> String {
        self.launch_config
            .as_ref()
            .map(|lc| lc.to_string())
            .unwrap_or_else(|| "none".to_string())
    }
}

/// Auto Scaling group capacity settings and target configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    pub name: String,
    pub target: LaunchConfigId,
    pub min_size: usize,
    pub max_size: usize,
    pub desired_capacity: usize,
}

/// How a group is looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupFilter {
    /// Group names starting with the value, like an anchored `^value` pattern.
    Prefix(String),
    Exact(String),
}

impl GroupFilter {
    pub fn matches(&self, group_name: &str) -> bool {
        match self {
            Self::Prefix(prefix) => group_name.starts_with(prefix.as_str()),
            Self::Exact(name) => group_name == name,
        }
    }
}

impl fmt::Display for GroupFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prefix(prefix) => write!(f, "^{}", prefix),
            Self::Exact(name) => f.write_str(name),
        }
    }
}

/// Group settings and membership fetched together.
#[derive(Debug, Clone, Serialize)]
pub struct GroupSnapshot {
    pub group: Group,
    pub members: Vec<Member>,
}

impl GroupSnapshot {
    pub fn member(&self, id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.id == id)
    }

    pub fn is_member_in_service(&self, id: &str) -> bool {
        self.member(id).is_some_and(Member::is_in_service)
    }

    pub fn in_service_count(&self) -> usize {
        self.members.iter().filter(|m| m.is_in_service()).count()
    }

    /// In-service count ignoring one member (the one being replaced).
    pub fn in_service_count_excluding(&self, excluded: Option<&str>) -> usize {
        self.members
            .iter()
            .filter(|m| m.is_in_service() && Some(m.id.as_str()) != excluded)
            .count()
    }

    /// Desired capacity reached, every member in service, minimum satisfied.
    pub fn meets_capacity(&self) -> bool {
        let in_service = self.in_service_count();
        in_service >= self.group.desired_capacity
            && in_service >= self.group.min_size
            && self.members.iter().all(Member::is_in_service)
    }
}
