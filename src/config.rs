//! CLI configuration and argument parsing.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::RollerError;
use crate::fleet::GroupFilter;
use crate::logging::LogFormat;
use crate::rolling::PollSettings;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("BUILD_COMMIT");
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Ordered rolling upgrade for EC2 Auto Scaling groups.
///
/// Terminates outdated instances one at a time, oldest first, and waits for
/// the group to return to full service before moving on.
#[derive(Parser, Debug, Clone)]
#[command(name = "asgr")]
#[command(about = "Ordered rolling upgrade for EC2 Auto Scaling groups")]
#[command(version = const_format::formatcp!(
    "{} (commit: {}, build date: {})",
    VERSION, COMMIT, BUILD_DATE
))]
pub struct Args {
    /// Auto Scaling group name prefix, must match exactly one group
    #[arg(short, long, env = "ASGR_LIMIT")]
    pub limit: String,

    /// Seconds to sleep between poll attempts
    #[arg(long, default_value = "30", env = "ASGR_SLEEP")]
    pub sleep: u64,

    /// Poll attempts before giving up on a replacement
    #[arg(long, default_value = "40", env = "ASGR_MAX_WAIT_ATTEMPTS")]
    pub max_wait_attempts: u32,

    /// AWS region
    #[arg(short, long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// AWS profile to use
    #[arg(short, long, env = "AWS_PROFILE")]
    pub profile: Option<String>,

    /// Bastion host used as SSH jump host; enables the SSH readiness check
    #[arg(long, env = "ASGR_SSH_TUNNEL")]
    pub ssh_tunnel: Option<String>,

    /// SSH username on the instances
    #[arg(long, default_value = "centos", env = "ASGR_SSH_USERNAME")]
    pub ssh_username: String,

    /// SSH private key path; enables the SSH readiness check
    #[arg(long, env = "ASGR_SSH_PRIVATE_KEY")]
    pub ssh_private_key: Option<PathBuf>,

    /// Require a TCP connection to this port on every member before a group is stable.
    /// Ignored when the SSH readiness check is enabled
    #[arg(long, env = "ASGR_PROBE_PORT")]
    pub probe_port: Option<u16>,

    /// Print the termination order without terminating anything
    #[arg(long, default_value = "false")]
    pub dry_run: bool,

    /// Skip confirmation prompt
    #[arg(short, long, default_value = "false")]
    pub yes: bool,

    /// Shorthand for --log-level debug
    #[arg(long, default_value = "false")]
    pub debug: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "ASGR_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[arg(long, default_value = "pretty", env = "ASGR_LOG_FORMAT")]
    pub log_format: String,
}

/// How the SSH readiness check reaches the instances. Never consulted by the
/// ordering logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityContext {
    pub ssh_tunnel: Option<String>,
    pub ssh_username: String,
    pub ssh_private_key: Option<PathBuf>,
    pub remote_port: u16,
}

impl ConnectivityContext {
    pub const SSH_PORT: u16 = 22;

    pub fn is_tunneled(&self) -> bool {
        self.ssh_tunnel.is_some()
    }

    /// `user@host:port` of the bastion, or `none`.
    pub fn describe(&self) -> String {
        match &self.ssh_tunnel {
            Some(host) => format!("{}@{}:{}", self.ssh_username, host, self.remote_port),
            None => "none".to_string(),
        }
    }
}

/// Application configuration derived from CLI args.
#[derive(Debug, Clone)]
pub struct Config {
    pub filter: GroupFilter,
    pub poll: PollSettings,
    pub region: Option<String>,
    pub profile: Option<String>,
    pub connectivity: ConnectivityContext,
    pub probe_port: Option<u16>,
    pub dry_run: bool,
    pub yes: bool,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    /// Validate CLI arguments into a config.
    pub fn from_args(args: Args) -> Result<Self, RollerError> {
        let limit = args.limit.trim();
        if limit.is_empty() {
            return Err(RollerError::InvalidConfig(
                "limit must not be empty".to_string(),
            ));
        }

        if args.max_wait_attempts == 0 {
            return Err(RollerError::InvalidConfig(
                "max_wait_attempts must be at least 1".to_string(),
            ));
        }

        if args.probe_port == Some(0) {
            return Err(RollerError::InvalidConfig(
                "probe_port must be between 1 and 65535".to_string(),
            ));
        }

        let log_level = if args.debug {
            "debug".to_string()
        } else {
            args.log_level
        };

        Ok(Self {
            filter: GroupFilter::Prefix(limit.to_string()),
            poll: PollSettings {
                interval: Duration::from_secs(args.sleep),
                max_attempts: args.max_wait_attempts,
            },
            region: args.region,
            profile: args.profile,
            connectivity: ConnectivityContext {
                ssh_tunnel: args.ssh_tunnel.filter(|t| !t.trim().is_empty()),
                ssh_username: args.ssh_username,
                ssh_private_key: args.ssh_private_key,
                remote_port: ConnectivityContext::SSH_PORT,
            },
            probe_port: args.probe_port,
            dry_run: args.dry_run,
            yes: args.yes,
            log_level,
            log_format: LogFormat::parse(&args.log_format),
        })
    }

    /// Settings shown at startup.
    pub fn display(&self) -> Vec<(&'static str, String)> {
        vec![
            ("group filter", self.filter.to_string()),
            ("poll interval", format!("{}s", self.poll.interval.as_secs())),
            ("max wait attempts", self.poll.max_attempts.to_string()),
            (
                "region",
                self.region.clone().unwrap_or_else(|| "default".to_string()),
            ),
            (
                "profile",
                self.profile.clone().unwrap_or_else(|| "default".to_string()),
            ),
            ("ssh tunnel", self.connectivity.describe()),
            (
                "ssh key",
                self.connectivity
                    .ssh_private_key
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "none".to_string()),
            ),
            (
                "probe port",
                self.probe_port
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "none".to_string()),
            ),
            ("dry run", self.dry_run.to_string()),
        ]
    }
}
