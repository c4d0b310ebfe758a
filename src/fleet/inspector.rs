//! Read-only fleet queries.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_autoscaling::types::{AutoScalingGroup, LaunchTemplateSpecification};
use aws_sdk_ec2::types::Filter;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::types::{Group, GroupFilter, GroupSnapshot, LaunchConfigId, LifecycleState, Member};
use crate::aws::retry::with_backoff;
use crate::aws::{AwsClients, Backoff};
use crate::error::{Result, RollerError};

/// Query interface over group membership. Implementations never cache:
/// every call reflects the platform at the time it is made.
#[async_trait]
pub trait FleetInspector: Send + Sync {
    /// Resolve exactly one group, or fail with `GroupResolution`.
    async fn resolve_group(&self, filter: &GroupFilter) -> Result<Group>;

    /// Current members of the group, freshly queried.
    async fn list_members(&self, group: &Group) -> Result<Vec<Member>>;
}

/// Resolve the group and fetch its members.
pub async fn inspect(inspector: &dyn FleetInspector, filter: &GroupFilter) -> Result<GroupSnapshot> {
    let group = inspector.resolve_group(filter).await?;
    let members = inspector.list_members(&group).await?;
    Ok(GroupSnapshot { group, members })
}

/// Fleet inspector backed by the Auto Scaling and EC2 APIs.
pub struct AwsFleetInspector {
    clients: AwsClients,
    backoff: Backoff,
}

impl AwsFleetInspector {
    pub fn new(clients: &AwsClients) -> Self {
        Self {
            clients: clients.clone(),
            backoff: Backoff::default(),
        }
    }

    async fn describe_groups(&self, filter: &GroupFilter) -> Result<Vec<AutoScalingGroup>> {
        let mut groups = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let token = next_token.take();
            let response = with_backoff(&self.backoff, "DescribeAutoScalingGroups", || {
                let mut request = self.clients.asg.describe_auto_scaling_groups();
                if let GroupFilter::Exact(name) = filter {
                    request = request.auto_scaling_group_names(name);
                }
                if let Some(token) = token.clone() {
                    request = request.next_token(token);
                }
                async move {
                    request
                        .send()
                        .await
                        .map_err(|e| RollerError::aws(module_path!(), e))
                }
            })
            .await?;

            groups.extend(
                response
                    .auto_scaling_groups()
                    .iter()
                    .filter(|g| {
                        g.auto_scaling_group_name()
                            .is_some_and(|name| filter.matches(name))
                    })
                    .cloned(),
            );

            next_token = response.next_token().map(|s| s.to_string());
            if next_token.is_none() {
                break;
            }
        }

        debug!(filter = %filter, matched = groups.len(), "Described Auto Scaling groups");
        Ok(groups)
    }

    async fn describe_single_group(&self, filter: &GroupFilter) -> Result<AutoScalingGroup> {
        let mut groups = self.describe_groups(filter).await?;
        if groups.len() != 1 {
            return Err(RollerError::GroupResolution {
                filter: filter.to_string(),
                matched: groups
                    .iter()
                    .filter_map(|g| g.auto_scaling_group_name().map(|s| s.to_string()))
                    .collect(),
            });
        }
        Ok(groups.remove(0))
    }

    async fn target_launch_config(&self, asg: &AutoScalingGroup) -> Result<LaunchConfigId> {
        if let Some(name) = asg.launch_configuration_name() {
            return Ok(LaunchConfigId::configuration(name));
        }

        let spec = asg.launch_template().or_else(|| {
            asg.mixed_instances_policy()
                .and_then(|p| p.launch_template())
                .and_then(|lt| lt.launch_template_specification())
        });

        let Some(spec) = spec else {
            return Err(RollerError::InvalidConfig(format!(
                "group {} has neither a launch configuration nor a launch template",
                asg.auto_scaling_group_name().unwrap_or("unknown")
            )));
        };

        // A concrete version on a known template id needs no lookup
        if let (Some(id), Some(version)) = (spec.launch_template_id(), spec.version())
            && is_concrete_version(version)
        {
            return Ok(LaunchConfigId::template(id, version));
        }

        let (id, default_version, latest_version) = self
            .describe_launch_template(spec.launch_template_id(), spec.launch_template_name())
            .await?;

        let version = resolve_template_version(spec.version(), default_version, latest_version)
            .ok_or_else(|| {
                RollerError::InvalidConfig(format!(
                    "cannot resolve version {} of launch template {}",
                    spec.version().unwrap_or("$Default"),
                    id
                ))
            })?;

        Ok(LaunchConfigId::template(id, version))
    }

    /// Returns (template id, default version, latest version).
    async fn describe_launch_template(
        &self,
        id: Option<&str>,
        name: Option<&str>,
    ) -> Result<(String, Option<i64>, Option<i64>)> {
        if id.is_none() && name.is_none() {
            return Err(RollerError::InvalidConfig(
                "launch template reference has neither id nor name".to_string(),
            ));
        }

        let response = with_backoff(&self.backoff, "DescribeLaunchTemplates", || {
            let mut request = self.clients.ec2.describe_launch_templates();
            if let Some(id) = id {
                request = request.launch_template_ids(id);
            } else if let Some(name) = name {
                request = request.launch_template_names(name);
            }
            async move {
                request
                    .send()
                    .await
                    .map_err(|e| RollerError::aws(module_path!(), e))
            }
        })
        .await?;

        let template = response
            .launch_templates()
            .first()
            .and_then(|t| t.launch_template_id().map(|id| (t, id)));

        match template {
            Some((t, template_id)) => Ok((
                template_id.to_string(),
                t.default_version_number(),
                t.latest_version_number(),
            )),
            None => Err(RollerError::InvalidConfig(format!(
                "launch template {} not found",
                id.or(name).unwrap_or("unknown")
            ))),
        }
    }

    async fn member_launch_config(
        &self,
        instance_id: &str,
        lc_name: Option<&str>,
        lt: Option<&LaunchTemplateSpecification>,
        tagged_version: Option<&str>,
        template_ids: &mut HashMap<String, String>,
    ) -> Result<Option<LaunchConfigId>> {
        if let Some(name) = lc_name {
            return Ok(Some(LaunchConfigId::configuration(name)));
        }
        let Some(lt) = lt else {
            return Ok(None);
        };
        let Some(version) = member_template_version(lt.version(), tagged_version) else {
            warn!(
                instance_id = %instance_id,
                reported = lt.version().unwrap_or("unset"),
                "Launch template version of member unknown, treating it as outdated"
            );
            return Ok(None);
        };

        let id = match (lt.launch_template_id(), lt.launch_template_name()) {
            (Some(id), _) => id.to_string(),
            (None, Some(name)) => {
                if let Some(id) = template_ids.get(name) {
                    id.clone()
                } else {
                    let (id, _, _) = self.describe_launch_template(None, Some(name)).await?;
                    template_ids.insert(name.to_string(), id.clone());
                    id
                }
            }
            (None, None) => return Ok(None),
        };

        Ok(Some(LaunchConfigId::template(id, version)))
    }

    /// Launch time, private IP and launch template version tag per instance id.
    async fn describe_instances(
        &self,
        instance_ids: &[String],
    ) -> Result<HashMap<String, InstanceDetails>> {
        let mut details = HashMap::new();

        // An empty id filter would describe every instance in the account
        for batch in id_batches(instance_ids) {
            let mut next_token: Option<String> = None;
            loop {
                let token = next_token.take();
                let response = with_backoff(&self.backoff, "DescribeInstances", || {
                    let filter = Filter::builder()
                        .name("instance-id")
                        .set_values(Some(batch.to_vec()))
                        .build();
                    let mut request = self.clients.ec2.describe_instances().filters(filter);
                    if let Some(token) = token.clone() {
                        request = request.next_token(token);
                    }
                    async move {
                        request
                            .send()
                            .await
                            .map_err(|e| RollerError::aws(module_path!(), e))
                    }
                })
                .await?;

                for instance in response.reservations().iter().flat_map(|r| r.instances()) {
                    let Some(id) = instance.instance_id() else {
                        continue;
                    };
                    let launch_time = instance
                        .launch_time()
                        .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
                        .unwrap_or(DateTime::UNIX_EPOCH);
                    let template_version = instance
                        .tags()
                        .iter()
                        .find(|t| t.key() == Some(TEMPLATE_VERSION_TAG))
                        .and_then(|t| t.value())
                        .map(|v| v.to_string());
                    details.insert(
                        id.to_string(),
                        InstanceDetails {
                            launch_time,
                            private_ip: instance.private_ip_address().map(|s| s.to_string()),
                            template_version,
                        },
                    );
                }

                next_token = response.next_token().map(|s| s.to_string());
                if next_token.is_none() {
                    break;
                }
            }
        }

        Ok(details)
    }
}

#[async_trait]
impl FleetInspector for AwsFleetInspector {
    async fn resolve_group(&self, filter: &GroupFilter) -> Result<Group> {
        let asg = self.describe_single_group(filter).await?;
        let target = self.target_launch_config(&asg).await?;

        let group = Group {
            name: asg.auto_scaling_group_name().unwrap_or_default().to_string(),
            target,
            min_size: non_negative(asg.min_size()),
            max_size: non_negative(asg.max_size()),
            desired_capacity: non_negative(asg.desired_capacity()),
        };

        debug!(
            group = %group.name,
            target = %group.target,
            min_size = group.min_size,
            desired_capacity = group.desired_capacity,
            "Resolved Auto Scaling group"
        );
        Ok(group)
    }

    async fn list_members(&self, group: &Group) -> Result<Vec<Member>> {
        let asg = self
            .describe_single_group(&GroupFilter::Exact(group.name.clone()))
            .await?;

        let listed: Vec<_> = asg
            .instances()
            .iter()
            .filter_map(|instance| {
                let id = instance.instance_id()?;
                let state = LifecycleState::from_platform(
                    instance
                        .lifecycle_state()
                        .map(|s| s.as_str())
                        .unwrap_or("Unknown"),
                    instance.health_status(),
                );
                (state != LifecycleState::Terminated).then_some((id.to_string(), state, instance))
            })
            .collect();

        let ids: Vec<String> = listed.iter().map(|(id, _, _)| id.clone()).collect();
        let details = self.describe_instances(&ids).await?;

        let mut template_ids = HashMap::new();
        let mut members = Vec::with_capacity(listed.len());

        for (id, state, instance) in listed {
            let found = details.get(&id);
            let launch_config = self
                .member_launch_config(
                    &id,
                    instance.launch_configuration_name(),
                    instance.launch_template(),
                    found.and_then(|d| d.template_version.as_deref()),
                    &mut template_ids,
                )
                .await?;

            let mut member = Member::new(&id, launch_config, DateTime::UNIX_EPOCH, state);
            member.availability_zone = instance.availability_zone().map(|s| s.to_string());
            match found {
                Some(d) => {
                    member.launch_time = d.launch_time;
                    member.private_ip = d.private_ip.clone();
                }
                None => warn!(
                    instance_id = %member.id,
                    group = %group.name,
                    "Instance not found in EC2, ordering it as oldest"
                ),
            }
            members.push(member);
        }

        debug!(group = %group.name, members = members.len(), "Listed group members");
        Ok(members)
    }
}

/// EC2 tag carrying the concrete template version an instance launched from.
const TEMPLATE_VERSION_TAG: &str = "aws:ec2launchtemplate:version";

/// DescribeInstances rejects filters with more values than this.
const MAX_FILTER_VALUES: usize = 200;

#[derive(Debug, Clone)]
struct InstanceDetails {
    launch_time: DateTime<Utc>,
    private_ip: Option<String>,
    template_version: Option<String>,
}

fn id_batches(instance_ids: &[String]) -> std::slice::Chunks<'_, String> {
    instance_ids.chunks(MAX_FILTER_VALUES)
}

fn non_negative(value: Option<i32>) -> usize {
    value.unwrap_or(0).max(0) as usize
}

fn is_concrete_version(version: &str) -> bool {
    !version.is_empty() && version.chars().all(|c| c.is_ascii_digit())
}

/// Turn a launch template version reference into a concrete version number.
/// An unset version means `$Default`.
fn resolve_template_version(
    requested: Option<&str>,
    default_version: Option<i64>,
    latest_version: Option<i64>,
) -> Option<String> {
    match requested {
        None | Some("$Default") => default_version.map(|v| v.to_string()),
        Some("$Latest") => latest_version.map(|v| v.to_string()),
        Some(v) if is_concrete_version(v) => Some(v.to_string()),
        Some(_) => None,
    }
}

/// Concrete version a member was launched from.
///
/// The group API echoes the symbolic reference (`$Latest`, `$Default`) the
/// member was launched with, so the instance tag is authoritative then.
fn member_template_version(reported: Option<&str>, tagged: Option<&str>) -> Option<String> {
    match reported {
        Some(v) if is_concrete_version(v) => Some(v.to_string()),
        _ => tagged.filter(|v| is_concrete_version(v)).map(|v| v.to_string()),
    }
}
