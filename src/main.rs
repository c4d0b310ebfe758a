//! asgr - ordered rolling upgrade for EC2 Auto Scaling groups.
//!
//! Replaces instances that run an outdated launch configuration or launch
//! template version:
//! - Oldest outdated instance first
//! - One termination at a time
//! - Bounded wait for the group to return to full service in between

mod aws;
mod config;
mod error;
mod fleet;
mod logging;
mod output;
mod rolling;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use dialoguer::Confirm;
use tracing::{debug, error, info, warn};

use aws::AwsClients;
use config::{Args, COMMIT, Config, VERSION};
use error::RollerError;
use fleet::{AsgTerminator, AwsFleetInspector, GroupFilter, inspect};
use output::{print_config, print_failure, print_plan, print_summary};
use rolling::{Controller, planner, probe, resolver};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    logging::init(config.log_format, &config.log_level);

    info!(version = VERSION, commit = COMMIT, "Starting asgr");

    if let Err(e) = run(&config).await {
        let code = match e.downcast_ref::<RollerError>() {
            Some(err) => {
                print_failure(err, config.log_format);
                err.exit_code()
            }
            None => 1,
        };
        error!(error = %format!("{e:#}"), exit_code = code, "asgr failed");
        std::process::exit(code);
    }
}

/// Main application logic.
async fn run(config: &Config) -> Result<()> {
    print_config(config);

    let clients = AwsClients::new(config.profile.as_deref(), config.region.as_deref()).await;
    let inspector = AwsFleetInspector::new(&clients);
    let terminator = AsgTerminator::new(&clients);

    let snapshot = inspect(&inspector, &config.filter).await?;
    let ordered = planner::order(&resolver::resolve(&snapshot.group, &snapshot.members));
    print_plan(&snapshot, &ordered);

    if config.dry_run {
        println!();
        println!("{}", "[DRY RUN] No instances were terminated.".yellow());
        return Ok(());
    }

    if !ordered.is_empty() && !config.yes {
        println!();
        let proceed = Confirm::new()
            .with_prompt(format!(
                "Terminate {} instance(s) in {} one at a time?",
                ordered.len(),
                snapshot.group.name
            ))
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;

        if !proceed {
            return Err(RollerError::UserCancelled.into());
        }
    }

    let probe = probe::from_options(config.probe_port, &config.connectivity);
    debug!(
        probe = probe.name(),
        ssh_username = %config.connectivity.ssh_username,
        region = %clients.region(),
        "Readiness probe selected"
    );

    let mut controller = Controller::new(
        &inspector,
        &terminator,
        probe.as_ref(),
        GroupFilter::Exact(snapshot.group.name.clone()),
        config.poll,
    );

    let outcome = tokio::select! {
        result = controller.run() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    let Some(result) = outcome else {
        let outstanding = controller.outstanding().map(str::to_string);
        warn!(
            state = ?controller.state(),
            outstanding_termination = %outstanding.as_deref().unwrap_or("none"),
            "Interrupted, in-flight termination is left to the platform"
        );
        return Err(RollerError::Interrupted { outstanding }.into());
    };

    let summary = result?;
    print_summary(&summary);
    Ok(())
}
