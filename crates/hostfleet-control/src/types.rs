//! Request and response types for control operations.

use std::time::Duration;

use hostfleet_core::{usage_percent, Dimension, HostId, Resources, Shortfall};
use hostfleet_provision::RunnerError;
use hostfleet_store::{Allocation, Host, HostState, Reference, SshAuth};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Request to add a host to the inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterHostRequest {
    /// Hostname, unique across the inventory.
    pub name: String,
    /// Management IP address, unique across the inventory.
    pub ip: String,
    /// SSH login user.
    #[serde(default = "RegisterHostRequest::default_ssh_user")]
    pub ssh_user: String,
    /// SSH port.
    #[serde(default = "RegisterHostRequest::default_ssh_port")]
    pub ssh_port: u16,
    /// SSH authentication method.
    #[serde(default)]
    pub auth: SshAuth,
    /// Optional region label.
    #[serde(default)]
    pub region: Option<String>,
    /// Initial capacity, normally filled in by provisioning.
    #[serde(default)]
    pub total: Option<Resources>,
}

impl RegisterHostRequest {
    fn default_ssh_user() -> String {
        "root".to_string()
    }

    const fn default_ssh_port() -> u16 {
        22
    }

    /// Create a request with default SSH settings.
    #[must_use]
    pub fn new(name: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip: ip.into(),
            ssh_user: Self::default_ssh_user(),
            ssh_port: Self::default_ssh_port(),
            auth: SshAuth::Agent,
            region: None,
            total: None,
        }
    }

    /// Set the initial capacity.
    #[must_use]
    pub const fn with_capacity(mut self, total: Resources) -> Self {
        self.total = Some(total);
        self
    }

    /// Set the region label.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set the SSH login.
    #[must_use]
    pub fn with_ssh(mut self, user: impl Into<String>, port: u16, auth: SshAuth) -> Self {
        self.ssh_user = user.into();
        self.ssh_port = port;
        self.auth = auth;
        self
    }
}

/// Request to reserve resources on a host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationRequest {
    /// Free-form purpose tag.
    pub purpose: String,
    /// Amounts to reserve.
    pub resources: Resources,
    /// The entity requesting the reservation.
    #[serde(default)]
    pub reference: Option<Reference>,
}

impl AllocationRequest {
    /// Create a request without a reference.
    #[must_use]
    pub fn new(purpose: impl Into<String>, resources: Resources) -> Self {
        Self {
            purpose: purpose.into(),
            resources,
            reference: None,
        }
    }

    /// Attach the requesting entity.
    #[must_use]
    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }
}

/// Outcome of a runner-backed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// The runner succeeded and the host was updated.
    Success,
    /// The runner failed; the failure is recorded on the host.
    Failed,
}

/// Why a runner-backed operation failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationFailure {
    /// The runner failed, timed out, was cancelled or could not start.
    Runner {
        /// The runner's error.
        error: RunnerError,
    },
    /// Gathered facts report less capacity than is already allocated.
    CapacityBelowAllocation {
        /// The dimension that fell short.
        dimension: Dimension,
        /// Capacity reported by the host.
        reported: u64,
        /// Amount already allocated on that dimension.
        allocated: u64,
    },
}

impl OperationFailure {
    /// Facts reported `shortfall.available` where `shortfall.requested` is allocated.
    #[must_use]
    pub const fn below_allocation(shortfall: Shortfall) -> Self {
        Self::CapacityBelowAllocation {
            dimension: shortfall.dimension,
            reported: shortfall.available,
            allocated: shortfall.requested,
        }
    }

    /// Classification of this failure.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Runner { .. } => ErrorKind::Gateway,
            Self::CapacityBelowAllocation { .. } => ErrorKind::InsufficientCapacity,
        }
    }

    /// Returns true if re-running the operation might succeed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::Runner { error } => error.is_retriable(),
            Self::CapacityBelowAllocation { .. } => false,
        }
    }

    /// The runner error, if the runner caused the failure.
    #[must_use]
    pub const fn runner_error(&self) -> Option<&RunnerError> {
        match self {
            Self::Runner { error } => Some(error),
            Self::CapacityBelowAllocation { .. } => None,
        }
    }
}

impl From<RunnerError> for OperationFailure {
    fn from(error: RunnerError) -> Self {
        Self::Runner { error }
    }
}

impl std::fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Runner { error } => write!(f, "{error}"),
            Self::CapacityBelowAllocation {
                dimension,
                reported,
                allocated,
            } => write!(
                f,
                "reported {dimension} capacity {reported}{unit} is below the {allocated}{unit} already allocated",
                unit = dimension.unit()
            ),
        }
    }
}

/// Structured result of `provision`, `setup_vm_host` and `check_health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    /// Whether the operation succeeded.
    pub status: OperationStatus,
    /// Human-readable summary or failure detail.
    pub message: String,
    /// Cause of a failed operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<OperationFailure>,
    /// The host record after the operation.
    pub host: Host,
}

impl OperationResult {
    /// A successful outcome.
    #[must_use]
    pub fn success(message: impl Into<String>, host: Host) -> Self {
        Self {
            status: OperationStatus::Success,
            message: message.into(),
            failure: None,
            host,
        }
    }

    /// A failed outcome; the message is the failure's description.
    #[must_use]
    pub fn failed(failure: OperationFailure, host: Host) -> Self {
        Self {
            status: OperationStatus::Failed,
            message: failure.to_string(),
            failure: Some(failure),
            host,
        }
    }

    /// Returns true if the operation succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == OperationStatus::Success
    }

    /// The runner error behind a failed outcome, if any.
    #[must_use]
    pub fn runner_error(&self) -> Option<&RunnerError> {
        self.failure.as_ref().and_then(OperationFailure::runner_error)
    }
}

/// Allocated share of a host's capacity, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    /// Allocated CPU as a percentage of total.
    pub cpu_percent: f64,
    /// Allocated memory as a percentage of total.
    pub memory_percent: f64,
    /// Allocated disk as a percentage of total.
    pub disk_percent: f64,
}

impl UsageSummary {
    /// Compute usage for a host. A dimension with zero total reports `0`.
    #[must_use]
    pub fn for_host(host: &Host) -> Self {
        Self {
            cpu_percent: usage_percent(host.allocated.cpu_millicores, host.total.cpu_millicores),
            memory_percent: usage_percent(host.allocated.memory_mb, host.total.memory_mb),
            disk_percent: usage_percent(host.allocated.disk_gb, host.total.disk_gb),
        }
    }
}

/// A host with its allocations and usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostDetails {
    /// The host record.
    pub host: Host,
    /// Free capacity.
    pub available: Resources,
    /// Active allocations, oldest first.
    pub allocations: Vec<Allocation>,
    /// Allocated share of capacity.
    pub usage: UsageSummary,
}

/// Result of recomputing a host's allocated counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    /// The reconciled host.
    pub host_id: HostId,
    /// Counters stored before reconciliation.
    pub recorded: Resources,
    /// Sum of the host's allocation records.
    pub actual: Resources,
}

impl ReconcileOutcome {
    /// Returns true if the stored counters disagreed with the records.
    #[must_use]
    pub fn drifted(&self) -> bool {
        self.recorded != self.actual
    }
}

/// Filter for the utilization report. Empty fields match every host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportFilter {
    /// Only this host.
    #[serde(default)]
    pub host_id: Option<HostId>,
    /// Only hosts in this state.
    #[serde(default)]
    pub status: Option<HostState>,
    /// Only hosts with this region label.
    #[serde(default)]
    pub region: Option<String>,
}

impl ReportFilter {
    /// Returns true if the host passes every set filter.
    #[must_use]
    pub fn matches(&self, host: &Host) -> bool {
        self.host_id.map_or(true, |id| id == host.host_id)
            && self.status.map_or(true, |status| status == host.status)
            && self
                .region
                .as_deref()
                .map_or(true, |region| host.region.as_deref() == Some(region))
    }
}

/// One row of the utilization report.
///
/// CPU is reported in cores, memory in MB and disk in GB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationRow {
    /// Host identifier.
    pub host: HostId,
    /// Hostname.
    pub hostname: String,
    /// Management address.
    pub ip: String,
    /// Total CPU in cores.
    pub total_cpu: f64,
    /// Allocated CPU in cores.
    pub allocated_cpu: f64,
    /// Allocated CPU in percent.
    pub cpu_percent: f64,
    /// Total memory in MB.
    pub total_memory: u64,
    /// Allocated memory in MB.
    pub allocated_memory: u64,
    /// Allocated memory in percent.
    pub memory_percent: f64,
    /// Total disk in GB.
    pub total_disk: u64,
    /// Allocated disk in GB.
    pub allocated_disk: u64,
    /// Allocated disk in percent.
    pub disk_percent: f64,
}

impl From<&Host> for UtilizationRow {
    fn from(host: &Host) -> Self {
        let usage = UsageSummary::for_host(host);
        Self {
            host: host.host_id,
            hostname: host.name.clone(),
            ip: host.ip.clone(),
            total_cpu: host.total.cpu_cores(),
            allocated_cpu: host.allocated.cpu_cores(),
            cpu_percent: usage.cpu_percent,
            total_memory: host.total.memory_mb,
            allocated_memory: host.allocated.memory_mb,
            memory_percent: usage.memory_percent,
            total_disk: host.total.disk_gb,
            allocated_disk: host.allocated.disk_gb,
            disk_percent: usage.disk_percent,
        }
    }
}

/// Configuration for the control service.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    /// Deadline for provisioning and VM host setup runs (seconds).
    #[serde(default = "ControlConfig::default_provision_timeout")]
    pub provision_timeout_seconds: u64,

    /// Deadline for the reachability probe (seconds).
    #[serde(default = "ControlConfig::default_health_timeout")]
    pub health_check_timeout_seconds: u64,

    /// Playbook that provisions a bare-metal host.
    #[serde(default = "ControlConfig::default_provision_playbook")]
    pub provision_playbook: String,

    /// Playbook that installs the VM host stack.
    #[serde(default = "ControlConfig::default_vm_host_playbook")]
    pub vm_host_playbook: String,

    /// Ad-hoc module used as the reachability probe.
    #[serde(default = "ControlConfig::default_health_module")]
    pub health_module: String,
}

impl ControlConfig {
    const fn default_provision_timeout() -> u64 {
        1800 // 30 minutes
    }

    const fn default_health_timeout() -> u64 {
        30
    }

    fn default_provision_playbook() -> String {
        "provision_bare_metal_host.yml".to_string()
    }

    fn default_vm_host_playbook() -> String {
        "setup_bare_metal_vm_host.yml".to_string()
    }

    fn default_health_module() -> String {
        "ping".to_string()
    }

    /// Get the provisioning deadline as a `Duration`.
    #[must_use]
    pub const fn provision_timeout(&self) -> Duration {
        Duration::from_secs(self.provision_timeout_seconds)
    }

    /// Get the probe deadline as a `Duration`.
    #[must_use]
    pub const fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_seconds)
    }

    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `HOSTFLEET_PROVISION_TIMEOUT_SECONDS`: provisioning deadline
    /// - `HOSTFLEET_HEALTH_TIMEOUT_SECONDS`: probe deadline
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("HOSTFLEET_PROVISION_TIMEOUT_SECONDS") {
            if let Ok(n) = val.parse() {
                config.provision_timeout_seconds = n;
            }
        }
        if let Ok(val) = std::env::var("HOSTFLEET_HEALTH_TIMEOUT_SECONDS") {
            if let Ok(n) = val.parse() {
                config.health_check_timeout_seconds = n;
            }
        }

        config
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            provision_timeout_seconds: Self::default_provision_timeout(),
            health_check_timeout_seconds: Self::default_health_timeout(),
            provision_playbook: Self::default_provision_playbook(),
            vm_host_playbook: Self::default_vm_host_playbook(),
            health_module: Self::default_health_module(),
        }
    }
}
