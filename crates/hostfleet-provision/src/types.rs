//! Invocation and result types shared by all runners.

use std::path::PathBuf;
use std::time::Duration;

use hostfleet_store::{Host, SshAuth};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::facts::HostFacts;

/// Default deadline for a playbook run.
pub const DEFAULT_PLAYBOOK_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default deadline for an ad-hoc module such as `ping`.
pub const DEFAULT_MODULE_TIMEOUT: Duration = Duration::from_secs(30);

/// SSH connection details for the host a task runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTarget {
    /// Address the runner connects to.
    pub address: String,
    /// SSH port.
    pub port: u16,
    /// SSH login user.
    pub user: String,
    /// Private key to authenticate with, or `None` for agent auth.
    pub private_key: Option<PathBuf>,
}

impl RunTarget {
    /// Build a target from a stored host record.
    #[must_use]
    pub fn for_host(host: &Host) -> Self {
        let private_key = match &host.auth {
            SshAuth::Agent => None,
            SshAuth::KeyFile { path } => Some(path.clone()),
        };
        Self {
            address: host.ip.clone(),
            port: host.ssh_port,
            user: host.ssh_user.clone(),
            private_key,
        }
    }

    /// The `host_ip`, `ssh_user` and `ssh_port` variables every playbook receives.
    #[must_use]
    pub fn variables(&self) -> Map<String, Value> {
        let mut vars = Map::new();
        vars.insert("host_ip".to_string(), Value::from(self.address.clone()));
        vars.insert("ssh_user".to_string(), Value::from(self.user.clone()));
        vars.insert("ssh_port".to_string(), Value::from(self.port));
        vars
    }
}

/// What to run against the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// A playbook file name, resolved against the runner's playbook directory.
    Playbook(String),
    /// An ad-hoc module name, e.g. `ping`.
    Module(String),
}

impl Task {
    /// Default deadline for this kind of task.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        match self {
            Self::Playbook(_) => DEFAULT_PLAYBOOK_TIMEOUT,
            Self::Module(_) => DEFAULT_MODULE_TIMEOUT,
        }
    }

    /// The playbook or module name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Playbook(name) | Self::Module(name) => name,
        }
    }
}

/// A single runner call.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Host to run against.
    pub target: RunTarget,
    /// Playbook or module.
    pub task: Task,
    /// Extra variables passed to the run.
    pub variables: Map<String, Value>,
    /// Deadline after which the run is killed.
    pub timeout: Duration,
    /// Cancelling this token kills the run.
    pub cancel: CancellationToken,
}

impl Invocation {
    /// Create an invocation with the target's standard variables and the
    /// task's default deadline.
    #[must_use]
    pub fn new(target: RunTarget, task: Task) -> Self {
        let variables = target.variables();
        let timeout = task.default_timeout();
        Self {
            target,
            task,
            variables,
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Override the deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    /// Facts reported for the target host.
    pub facts: HostFacts,
    /// Number of tasks the runner reported as changed.
    pub changed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hostfleet_core::{HostId, Resources};
    use hostfleet_store::{HealthStatus, HostState};

    fn host(auth: SshAuth) -> Host {
        Host {
            host_id: HostId::from_bytes([1u8; 32]),
            name: "node-1".to_string(),
            ip: "10.0.0.1".to_string(),
            ssh_user: "deploy".to_string(),
            ssh_port: 2222,
            auth,
            status: HostState::Unprovisioned,
            region: None,
            total: Resources::ZERO,
            allocated: Resources::ZERO,
            is_vm_host: false,
            health: HealthStatus::Unknown,
            last_health_check: None,
            health_error: None,
            os_info: None,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn target_from_host() {
        let target = RunTarget::for_host(&host(SshAuth::KeyFile {
            path: PathBuf::from("/keys/id_ed25519"),
        }));
        assert_eq!(target.address, "10.0.0.1");
        assert_eq!(target.port, 2222);
        assert_eq!(target.private_key, Some(PathBuf::from("/keys/id_ed25519")));

        let agent = RunTarget::for_host(&host(SshAuth::Agent));
        assert!(agent.private_key.is_none());
    }

    #[test]
    fn invocation_carries_standard_variables() {
        let target = RunTarget::for_host(&host(SshAuth::Agent));
        let invocation = Invocation::new(target, Task::Playbook("site.yml".to_string()));

        assert_eq!(invocation.variables["host_ip"], "10.0.0.1");
        assert_eq!(invocation.variables["ssh_user"], "deploy");
        assert_eq!(invocation.variables["ssh_port"], 2222);
        assert_eq!(invocation.timeout, DEFAULT_PLAYBOOK_TIMEOUT);
    }

    #[test]
    fn module_default_timeout() {
        let task = Task::Module("ping".to_string());
        assert_eq!(task.default_timeout(), Duration::from_secs(30));
        assert_eq!(task.name(), "ping");
    }
}
