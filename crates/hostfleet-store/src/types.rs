//! Domain types stored in the database.
//!
//! These types represent the persisted state of hosts and their resource allocations.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use hostfleet_core::{AllocationId, HostId, Resources};
use serde::{Deserialize, Serialize};

/// A bare-metal host record stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    /// Unique identifier for the host.
    pub host_id: HostId,
    /// Hostname, unique across the inventory.
    pub name: String,
    /// Management IP address, unique across the inventory.
    pub ip: String,
    /// SSH login user.
    pub ssh_user: String,
    /// SSH port.
    pub ssh_port: u16,
    /// How the runner authenticates over SSH.
    pub auth: SshAuth,
    /// Current lifecycle state.
    pub status: HostState,
    /// Optional region label used by reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Advertised capacity.
    pub total: Resources,
    /// Sum of all active allocations on this host.
    pub allocated: Resources,
    /// Whether the host has been set up to run virtual machines.
    pub is_vm_host: bool,
    /// Result of the last reachability probe.
    pub health: HealthStatus,
    /// When the last reachability probe completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_health_check: Option<DateTime<Utc>>,
    /// Error text from the last failed probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_error: Option<String>,
    /// Distribution string gathered during provisioning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_info: Option<String>,
    /// Failure detail when the host is in the Error state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Host {
    /// Capacity not covered by active allocations.
    ///
    /// Clamps at zero if a stored record was ever written with `allocated > total`.
    #[must_use]
    pub fn available(&self) -> Resources {
        self.total.saturating_sub(self.allocated)
    }
}

/// SSH authentication method used to reach a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SshAuth {
    /// Use the runner's SSH agent or default identities.
    #[default]
    Agent,
    /// Use an explicit private key file.
    KeyFile {
        /// Path to the private key on the machine running the provisioner.
        path: PathBuf,
    },
}

/// Lifecycle states for a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum HostState {
    /// Registered, never provisioned.
    Unprovisioned = 1,
    /// A provisioning or setup run is in flight.
    Provisioning = 2,
    /// Provisioned and accepting allocations.
    Active = 3,
    /// The last provisioning attempt failed.
    Error = 4,
    /// Held by an operator.
    Maintenance = 5,
}

impl HostState {
    /// Convert the state to its numeric representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to convert a numeric value to a `HostState`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Unprovisioned),
            2 => Some(Self::Provisioning),
            3 => Some(Self::Active),
            4 => Some(Self::Error),
            5 => Some(Self::Maintenance),
            _ => None,
        }
    }

    /// The snake-case name used on the wire and in filters.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unprovisioned => "unprovisioned",
            Self::Provisioning => "provisioning",
            Self::Active => "active",
            Self::Error => "error",
            Self::Maintenance => "maintenance",
        }
    }

    /// Parse the snake-case name used on the wire and in filters.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "unprovisioned" => Some(Self::Unprovisioned),
            "provisioning" => Some(Self::Provisioning),
            "active" => Some(Self::Active),
            "error" => Some(Self::Error),
            "maintenance" => Some(Self::Maintenance),
            _ => None,
        }
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health reported by the reachability probe. Independent of `HostState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// No probe has completed yet.
    #[default]
    Unknown,
    /// The last probe succeeded.
    Healthy,
    /// The last probe failed.
    Unhealthy,
}

/// A resource reservation against a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Unique identifier for the allocation.
    pub allocation_id: AllocationId,
    /// Host the resources are reserved on.
    pub host_id: HostId,
    /// Free-form purpose tag (e.g. `vm`, `bench`).
    pub purpose: String,
    /// Reserved amounts.
    pub resources: Resources,
    /// The entity that requested the reservation, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<Reference>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Polymorphic pointer to the entity that owns an allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Entity type, e.g. `virtual_machine`.
    pub kind: String,
    /// Entity identifier within its type.
    pub id: String,
}

impl Reference {
    /// Create a new reference.
    #[must_use]
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}
