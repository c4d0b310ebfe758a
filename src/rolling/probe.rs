//! Member readiness probes consulted before a group counts as stable.

use std::time::Duration;

use async_trait::async_trait;
use openssh::{KnownHosts, Session, SessionBuilder};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::config::ConnectivityContext;
use crate::fleet::Member;

#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn is_ready(&self, member: &Member) -> bool;
    fn name(&self) -> &str;
}

/// Trusts the platform's in-service state.
pub struct AlwaysReady;

#[async_trait]
impl ReadinessProbe for AlwaysReady {
    async fn is_ready(&self, _member: &Member) -> bool {
        true
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Ready once a TCP connection to the member's private address succeeds.
pub struct TcpProbe {
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }
}

#[async_trait]
impl ReadinessProbe for TcpProbe {
    async fn is_ready(&self, member: &Member) -> bool {
        let Some(ip) = member.private_ip.as_deref() else {
            debug!(instance_id = %member.id, "No private IP yet, not ready");
            return false;
        };

        let ready = matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect((ip, self.port))).await,
            Ok(Ok(_))
        );

        debug!(
            instance_id = %member.id,
            address = %ip,
            port = self.port,
            ready = ready,
            "Probed member"
        );
        ready
    }

    fn name(&self) -> &str {
        "tcp"
    }
}

/// Ready once cloud-init has finished on the member, checked over SSH.
///
/// Members are reached on their private address, through the bastion as a
/// jump host when one is configured.
pub struct SshProbe {
    connectivity: ConnectivityContext,
    timeout: Duration,
}

impl SshProbe {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
    pub const BOOT_FINISHED: &'static str = "/var/lib/cloud/instance/boot-finished";

    pub fn new(connectivity: ConnectivityContext, timeout: Duration) -> Self {
        Self {
            connectivity,
            timeout,
        }
    }

    /// `user@bastion:22`, when members sit behind a bastion.
    fn jump_host(&self) -> Option<String> {
        self.connectivity.ssh_tunnel.as_ref().map(|host| {
            format!(
                "{}@{}:{}",
                self.connectivity.ssh_username,
                host,
                ConnectivityContext::SSH_PORT
            )
        })
    }

    fn session_builder(&self) -> SessionBuilder {
        let mut builder = SessionBuilder::default();
        builder
            .user(self.connectivity.ssh_username.clone())
            .port(self.connectivity.remote_port)
            .connect_timeout(self.timeout)
            .known_hosts_check(KnownHosts::Accept);
        if let Some(key) = &self.connectivity.ssh_private_key {
            builder.keyfile(key);
        }
        if let Some(jump) = self.jump_host() {
            builder.jump_hosts([jump.as_str()]);
        }
        builder
    }

    async fn boot_finished(&self, ip: &str) -> Result<bool, openssh::Error> {
        let session: Session = self.session_builder().connect_mux(ip).await?;
        let status = session
            .command("test")
            .arg("-e")
            .arg(Self::BOOT_FINISHED)
            .status()
            .await;
        if let Err(e) = session.close().await {
            debug!(address = %ip, error = %e, "Failed to close SSH session");
        }
        Ok(status?.success())
    }
}

#[async_trait]
impl ReadinessProbe for SshProbe {
    async fn is_ready(&self, member: &Member) -> bool {
        let Some(ip) = member.private_ip.as_deref() else {
            debug!(instance_id = %member.id, "No private IP yet, not ready");
            return false;
        };

        let ready = match tokio::time::timeout(self.timeout, self.boot_finished(ip)).await {
            Ok(Ok(finished)) => finished,
            Ok(Err(e)) => {
                debug!(instance_id = %member.id, address = %ip, error = %e, "SSH check failed");
                false
            }
            Err(_) => {
                debug!(instance_id = %member.id, address = %ip, "SSH check timed out");
                false
            }
        };

        debug!(
            instance_id = %member.id,
            address = %ip,
            via = %self.connectivity.describe(),
            ready = ready,
            "Probed member"
        );
        ready
    }

    fn name(&self) -> &str {
        "ssh"
    }
}

/// Probe selected by the CLI options.
///
/// SSH settings (a key or a bastion) select the SSH check; otherwise a probe
/// port selects the TCP check. Private addresses behind a bastion are only
/// reachable over SSH, so the SSH check wins when both are given.
pub fn from_options(
    probe_port: Option<u16>,
    connectivity: &ConnectivityContext,
) -> Box<dyn ReadinessProbe> {
    if connectivity.is_tunneled() || connectivity.ssh_private_key.is_some() {
        if let Some(port) = probe_port {
            warn!(
                probe_port = port,
                ssh = %connectivity.describe(),
                "SSH readiness check configured, ignoring probe port"
            );
        }
        return Box::new(SshProbe::new(
            connectivity.clone(),
            SshProbe::DEFAULT_TIMEOUT,
        ));
    }

    match probe_port {
        Some(port) => Box::new(TcpProbe::new(port, TcpProbe::DEFAULT_TIMEOUT)),
        None => Box::new(AlwaysReady),
    }
}
