//! Custom error types for asgr.

use thiserror::Error;

use crate::fleet::GroupSnapshot;

/// Convenience alias used by the core and the AWS adapters.
pub type Result<T> = std::result::Result<T, RollerError>;

/// Errors that can halt a rolling upgrade.
#[derive(Error, Debug)]
pub enum RollerError {
    #[error("[{0}] {1}")]
    AwsSdk(String, String),

    #[error("[{0}] AWS credentials error: {1}")]
    AwsCredentials(String, String),

    #[error("[{0}] AWS region not configured: {1}")]
    AwsRegion(String, String),

    #[error("[{0}] request throttled: {1}")]
    Throttled(String, String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "Found {} Auto Scaling groups matching {filter}, expected exactly 1{}",
        .matched.len(),
        format_matches(.matched)
    )]
    GroupResolution {
        filter: String,
        matched: Vec<String>,
    },

    #[error("Termination of {instance_id} rejected: {reason}")]
    Termination { instance_id: String, reason: String },

    #[error("Termination of {0} is still outstanding, refusing to issue another")]
    TerminationOutstanding(String),

    #[error(
        "Group {} did not become stable after {attempts} attempts",
        .snapshot.group.name
    )]
    PollTimeout {
        attempts: u32,
        snapshot: Box<GroupSnapshot>,
    },

    #[error(
        "Quorum breach in group {}: {in_service} in service, minimum {min_size}{}",
        .snapshot.group.name,
        format_lost(.lost)
    )]
    QuorumBreach {
        in_service: usize,
        min_size: usize,
        lost: Vec<String>,
        snapshot: Box<GroupSnapshot>,
    },

    #[error("Operation cancelled by user")]
    UserCancelled,

    #[error("Interrupted{}", format_outstanding(.outstanding))]
    Interrupted { outstanding: Option<String> },
}

fn format_matches(matched: &[String]) -> String {
    if matched.is_empty() {
        String::new()
    } else {
        format!(": {}", matched.join(", "))
    }
}

fn format_lost(lost: &[String]) -> String {
    if lost.is_empty() {
        String::new()
    } else {
        format!(", lost up-to-date members: {}", lost.join(", "))
    }
}

fn format_outstanding(outstanding: &Option<String>) -> String {
    match outstanding {
        Some(id) => format!(", termination of {id} was not retracted"),
        None => String::new(),
    }
}

impl RollerError {
    /// Create an AWS SDK error from any error type.
    /// Analyzes the error message to provide more specific error types.
    pub fn aws<E: std::fmt::Debug + std::fmt::Display>(component: &str, err: E) -> Self {
        // Use Debug format to get more detailed error information
        let err_debug = format!("{err:?}");
        let err_display = err.to_string();
        let component = component.to_string();

        let combined_lower = format!("{err_display} {err_debug}").to_lowercase();
        let details = Self::extract_error_details(&err_debug, &err_display);

        if combined_lower.contains("throttl")
            || combined_lower.contains("rate exceeded")
            || combined_lower.contains("requestlimitexceeded")
        {
            return Self::Throttled(component, details);
        }

        if combined_lower.contains("no credentials")
            || combined_lower.contains("credentials not found")
            || combined_lower.contains("invalid credentials")
            || combined_lower.contains("expired token")
            || combined_lower.contains("expiredtoken")
            || combined_lower.contains("the security token included in the request is invalid")
            || combined_lower.contains("the security token included in the request is expired")
            || combined_lower.contains("unrecognized client")
            || combined_lower.contains("invalidclienttokenid")
            || combined_lower.contains("signaturedoesnotmatch")
            || combined_lower.contains("access denied")
            || combined_lower.contains("not authorized")
            || combined_lower.contains("accessdenied")
        {
            return Self::AwsCredentials(component, details);
        }

        if combined_lower.contains("no region")
            || combined_lower.contains("region not found")
            || combined_lower.contains("missing region")
        {
            return Self::AwsRegion(component, details);
        }

        Self::AwsSdk(component, details)
    }

    /// Extract meaningful error details from AWS SDK error.
    /// Returns a single-line error message.
    fn extract_error_details(debug_str: &str, display_str: &str) -> String {
        // Pattern: message: Some("actual error message")
        if let Some(pos) = debug_str.find("message: Some(\"") {
            let start = pos + "message: Some(\"".len();
            let rest = &debug_str[start..];
            if let Some(end) = rest.find('"') {
                return rest[..end].to_string();
            }
        }

        if !display_str.to_lowercase().contains("service error") {
            return display_str.to_string();
        }

        "AWS API request failed".to_string()
    }

    /// Returns true if this error is transient and the call may be repeated.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::AwsSdk(_, _) | Self::Throttled(_, _))
    }

    pub const fn is_throttling(&self) -> bool {
        matches!(self, Self::Throttled(_, _))
    }

    /// Process exit code for this failure kind.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::GroupResolution { .. } => 2,
            Self::Termination { .. } => 3,
            Self::PollTimeout { .. } => 4,
            Self::QuorumBreach { .. } => 5,
            Self::Interrupted { .. } => 130,
            _ => 1,
        }
    }

    /// Last fleet state observed before the failure, when one was captured.
    pub fn snapshot(&self) -> Option<&GroupSnapshot> {
        match self {
            Self::PollTimeout { snapshot, .. } | Self::QuorumBreach { snapshot, .. } => {
                Some(snapshot)
            }
            _ => None,
        }
    }
}
