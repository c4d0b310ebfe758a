//! AWS SDK client construction.

use aws_sdk_autoscaling::Client as AsgClient;
use aws_sdk_ec2::Client as Ec2Client;
use tracing::{debug, info};

/// Auto Scaling and EC2 clients built from one SDK configuration.
#[derive(Clone)]
pub struct AwsClients {
    pub asg: AsgClient,
    pub ec2: Ec2Client,
    region: String,
}

impl AwsClients {
    /// Load AWS configuration with optional profile and region overrides.
    ///
    /// Credentials come from the default provider chain; nothing here reads
    /// process-wide state beyond what `aws-config` itself resolves.
    pub async fn new(profile: Option<&str>, region: Option<&str>) -> Self {
        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(profile) = profile {
            debug!(profile = %profile, "Using AWS profile");
            config_loader = config_loader.profile_name(profile);
        }

        if let Some(region) = region {
            debug!(region = %region, "Using explicit AWS region");
            config_loader = config_loader.region(aws_config::Region::new(region.to_string()));
        }

        let config = config_loader.load().await;
        let region = config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        info!(region = %region, "AWS clients initialized");

        Self {
            asg: AsgClient::new(&config),
            ec2: Ec2Client::new(&config),
            region,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}
