//! Table formatting for CLI output.
//!
//! Plan, summary and failure reports printed to stdout. Logs go through
//! tracing; these are for the operator reading the terminal.

use colored::Colorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::config::Config;
use crate::error::RollerError;
use crate::fleet::{GroupSnapshot, Member};
use crate::logging::LogFormat;
use crate::rolling::UpgradeSummary;

/// Row for the termination order table.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "#")]
    position: usize,
    #[tabled(rename = "INSTANCE")]
    instance_id: String,
    #[tabled(rename = "LAUNCHED")]
    launch_time: String,
    #[tabled(rename = "CONFIG")]
    launch_config: String,
    #[tabled(rename = "AZ")]
    availability_zone: String,
}

/// Row for the fleet state table shown on failure.
#[derive(Tabled)]
struct MemberRow {
    #[tabled(rename = "INSTANCE")]
    instance_id: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "CONFIG")]
    launch_config: String,
    #[tabled(rename = "LAUNCHED")]
    launch_time: String,
    #[tabled(rename = "AZ")]
    availability_zone: String,
}

#[derive(Tabled)]
struct CycleRow {
    #[tabled(rename = "CYCLE")]
    cycle: usize,
    #[tabled(rename = "TERMINATED")]
    instance_id: String,
    #[tabled(rename = "CONFIG")]
    launch_config: String,
    #[tabled(rename = "LAUNCHED")]
    launch_time: String,
    #[tabled(rename = "TERMINATED AT")]
    terminated_at: String,
    #[tabled(rename = "POLLS")]
    poll_attempts: u32,
    #[tabled(rename = "ACTIVITY")]
    activity_id: String,
}

pub fn print_config(config: &Config) {
    println!("{}", "Configuration:".bold());
    for (key, value) in config.display() {
        println!("  {:<18} {}", format!("{key}:"), value);
    }
    println!();
}

/// Print the group header and the full termination order.
pub fn print_plan(snapshot: &GroupSnapshot, ordered: &[Member]) {
    let group = &snapshot.group;
    println!(
        "{} (target: {}, min: {}, desired: {}, max: {}, members: {})",
        format!("AutoScalingGroup/{}", group.name).bold(),
        group.target.to_string().cyan(),
        group.min_size,
        group.desired_capacity,
        group.max_size,
        snapshot.members.len()
    );

    if ordered.is_empty() {
        println!(
            "  {} All in-service members run the target configuration",
            "✓".green()
        );
        return;
    }

    println!(
        "Termination order ({} outdated, oldest first):",
        ordered.len().to_string().yellow()
    );
    let mut table = Table::new(plan_rows(ordered));
    apply_table_style(&mut table);
    println!("{}", table);
}

pub fn print_summary(summary: &UpgradeSummary) {
    println!();
    if summary.cycles.is_empty() {
        println!(
            "{} {} already runs {}, nothing terminated",
            "✓".green(),
            summary.group.bold(),
            summary.target
        );
        return;
    }

    if let Some(attempts) = summary.settle_attempts {
        println!("Group settled after {} poll attempt(s) before the first termination", attempts);
    }
    let mut table = Table::new(cycle_rows(summary));
    apply_table_style(&mut table);
    println!("{}", table);
    println!(
        "{} {} upgraded to {}: {} instance(s) replaced",
        "✓".green(),
        summary.group.bold(),
        summary.target.to_string().cyan(),
        summary.cycles.len()
    );
}

/// Print the failure kind and, when captured, the last observed fleet state.
pub fn print_failure(err: &RollerError, format: LogFormat) {
    println!();
    let label = match err {
        RollerError::QuorumBreach { .. } => "QUORUM BREACH".red().bold(),
        RollerError::PollTimeout { .. } => "POLL TIMEOUT".yellow().bold(),
        RollerError::Termination { .. } => "TERMINATION REJECTED".red().bold(),
        RollerError::GroupResolution { .. } => "GROUP RESOLUTION".red().bold(),
        _ => "FAILED".red().bold(),
    };
    println!("{} {}", label, err);

    let Some(snapshot) = err.snapshot() else {
        return;
    };

    match format {
        LogFormat::Json => match serde_json::to_string_pretty(snapshot) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to serialize last snapshot: {}", e),
        },
        LogFormat::Pretty => {
            println!(
                "Last observed state ({} in service, min {}, desired {}):",
                snapshot.in_service_count(),
                snapshot.group.min_size,
                snapshot.group.desired_capacity
            );
            let mut table = Table::new(member_rows(snapshot));
            apply_table_style(&mut table);
            println!("{}", table);
        }
    }
    println!(
        "{}",
        "Manual intervention required before re-running.".yellow()
    );
}

fn plan_rows(ordered: &[Member]) -> Vec<PlanRow> {
    ordered
        .iter()
        .enumerate()
        .map(|(i, m)| PlanRow {
            position: i + 1,
            instance_id: m.id.clone(),
            launch_time: format_time(m),
            launch_config: m.launch_config_label(),
            availability_zone: m.availability_zone.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect()
}

fn member_rows(snapshot: &GroupSnapshot) -> Vec<MemberRow> {
    let mut members: Vec<&Member> = snapshot.members.iter().collect();
    members.sort_by(|a, b| a.id.cmp(&b.id));
    members
        .into_iter()
        .map(|m| {
            let state = if m.is_in_service() {
                m.state.as_str().green().to_string()
            } else {
                m.state.as_str().yellow().to_string()
            };
            let launch_config = if m.runs(&snapshot.group.target) {
                m.launch_config_label()
            } else {
                m.launch_config_label().red().to_string()
            };
            MemberRow {
                instance_id: m.id.clone(),
                state,
                launch_config,
                launch_time: format_time(m),
                availability_zone: m.availability_zone.clone().unwrap_or_else(|| "-".to_string()),
            }
        })
        .collect()
}

fn cycle_rows(summary: &UpgradeSummary) -> Vec<CycleRow> {
    summary
        .cycles
        .iter()
        .map(|c| CycleRow {
            cycle: c.cycle,
            instance_id: c.instance_id.clone(),
            launch_config: c
                .launch_config
                .as_ref()
                .map(|lc| lc.to_string())
                .unwrap_or_else(|| "none".to_string()),
            launch_time: c.launch_time.format(TIME_FORMAT).to_string(),
            terminated_at: c.terminated_at.format(TIME_FORMAT).to_string(),
            poll_attempts: c.poll_attempts,
            activity_id: match (&c.activity_id, c.already_terminating) {
                (Some(id), _) => id.clone(),
                (None, true) => "already terminating".to_string(),
                (None, false) => "-".to_string(),
            },
        })
        .collect()
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn format_time(member: &Member) -> String {
    member.launch_time.format(TIME_FORMAT).to_string()
}

/// Apply kubectl-style borderless table formatting.
fn apply_table_style(table: &mut Table) {
    use tabled::settings::object::Columns;
    use tabled::settings::themes::Theme;
    use tabled::settings::{Modify, Padding};

    let mut theme = Theme::from_style(Style::empty());
    theme.remove_horizontal_lines();
    table.with(theme);
    table.with(Modify::new(Columns::new(..)).with(Padding::new(0, 2, 0, 0)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::LifecycleState;
    use crate::rolling::CycleRecord;
    use crate::testing::{group, launched_at, member, snapshot, stale, target};

    #[test]
    fn test_plan_rows_numbered_in_order() {
        let mut first = member("i-1", Some(stale()), 0, LifecycleState::InService);
        first.availability_zone = Some("ap-northeast-2a".to_string());
        let second = member("i-2", None, 90, LifecycleState::InService);

        let rows = plan_rows(&[first, second]);

        assert_eq!(rows[0].position, 1);
        assert_eq!(rows[0].launch_time, "2024-01-01 00:00:00");
        assert_eq!(rows[0].launch_config, "lc/lc-v1");
        assert_eq!(rows[0].availability_zone, "ap-northeast-2a");
        assert_eq!(rows[1].position, 2);
        assert_eq!(rows[1].launch_time, "2024-01-01 01:30:00");
        assert_eq!(rows[1].launch_config, "none");
        assert_eq!(rows[1].availability_zone, "-");
    }

    #[test]
    fn test_member_rows_sorted_by_id() {
        let snap = snapshot(
            group("zk", 2, 3),
            vec![
                member("i-3", Some(target()), 0, LifecycleState::InService),
                member("i-1", Some(stale()), 0, LifecycleState::Terminating),
            ],
        );

        let rows = member_rows(&snap);

        assert_eq!(rows[0].instance_id, "i-1");
        assert_eq!(rows[1].instance_id, "i-3");
        assert_eq!(rows[1].launch_config, "lc/lc-v2");
    }

    #[test]
    fn test_cycle_rows() {
        let summary = UpgradeSummary {
            group: "zk".to_string(),
            target: target(),
            settle_attempts: None,
            cycles: vec![CycleRecord {
                cycle: 1,
                instance_id: "i-1".to_string(),
                launch_config: Some(stale()),
                launch_time: launched_at(0),
                activity_id: None,
                terminated_at: launched_at(600),
                already_terminating: true,
                poll_attempts: 4,
            }],
        };

        let rows = cycle_rows(&summary);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].launch_config, "lc/lc-v1");
        assert_eq!(rows[0].terminated_at, "2024-01-01 10:00:00");
        assert_eq!(rows[0].poll_attempts, 4);
        assert_eq!(rows[0].activity_id, "already terminating");
    }
}
