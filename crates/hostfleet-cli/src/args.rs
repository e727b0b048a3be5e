//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use hostfleet_control::{HostState, Resources, SshAuth};

/// Hostfleet - bare-metal host inventory, capacity ledger and provisioning.
#[derive(Parser, Debug)]
#[command(name = "hostfleet")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory holding the `RocksDB` database.
    #[arg(long, env = "HOSTFLEET_DATA_DIR", default_value = "./hostfleet-data")]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage the host inventory.
    #[command(subcommand)]
    Host(HostCommand),

    /// Run the provisioning playbook against a host.
    Provision {
        /// Host ID or hostname.
        host: String,
    },

    /// Install the VM host stack on an active host.
    SetupVmHost {
        /// Host ID or hostname.
        host: String,
    },

    /// Put a host into or take it out of maintenance.
    Maintenance {
        /// Host ID or hostname.
        host: String,
        /// Desired maintenance mode.
        #[arg(value_enum)]
        mode: Toggle,
    },

    /// Probe a host's reachability.
    Health {
        /// Host ID or hostname.
        host: String,
    },

    /// Reserve resources on a host.
    Allocate {
        /// Host ID or hostname.
        host: String,
        /// What the reservation is for.
        #[arg(long, required_unless_present = "vm")]
        purpose: Option<String>,
        #[command(flatten)]
        resources: ResourceArgs,
        /// Kind of the requesting entity (requires --reference-id).
        #[arg(long, requires = "reference_id")]
        reference_kind: Option<String>,
        /// ID of the requesting entity (requires --reference-kind).
        #[arg(long, requires = "reference_kind")]
        reference_id: Option<String>,
        /// Reserve for a virtual machine with this name instead.
        #[arg(long, conflicts_with_all = ["purpose", "reference_kind", "reference_id"])]
        vm: Option<String>,
    },

    /// Release an allocation.
    Deallocate {
        /// Allocation ID.
        allocation: String,
    },

    /// Show the allocated share of a host's capacity.
    Usage {
        /// Host ID or hostname.
        host: String,
    },

    /// Print per-host capacity and utilization.
    Report {
        /// Only this host (ID or hostname).
        #[arg(long)]
        host: Option<String>,
        /// Only hosts in this state.
        #[arg(long, value_parser = parse_state)]
        status: Option<HostState>,
        /// Only hosts with this region label.
        #[arg(long)]
        region: Option<String>,
    },

    /// Recompute a host's allocated counters from its allocations.
    Reconcile {
        /// Host ID or hostname.
        host: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum HostCommand {
    /// Register a new host.
    Add(AddHost),

    /// List hosts.
    List {
        /// Only hosts in this state.
        #[arg(long, value_parser = parse_state)]
        status: Option<HostState>,
    },

    /// Show a host with its allocations and usage.
    Show {
        /// Host ID or hostname.
        host: String,
    },

    /// Delete a host.
    Delete {
        /// Host ID or hostname.
        host: String,
        /// Also delete the host's allocations.
        #[arg(long)]
        cascade: bool,
    },

    /// Override a host's advertised capacity.
    Capacity {
        /// Host ID or hostname.
        host: String,
        #[command(flatten)]
        resources: ResourceArgs,
    },
}

#[derive(Args, Debug)]
pub struct AddHost {
    /// Hostname.
    pub name: String,
    /// Management IP address.
    pub ip: String,
    /// SSH login user.
    #[arg(long, default_value = "root")]
    pub ssh_user: String,
    /// SSH port.
    #[arg(long, default_value_t = 22)]
    pub ssh_port: u16,
    /// Private key file; the SSH agent is used when omitted.
    #[arg(long)]
    pub ssh_key: Option<PathBuf>,
    /// Region label.
    #[arg(long)]
    pub region: Option<String>,
}

impl AddHost {
    pub fn auth(&self) -> SshAuth {
        self.ssh_key
            .clone()
            .map_or(SshAuth::Agent, |path| SshAuth::KeyFile { path })
    }
}

#[derive(Args, Debug, Clone, Copy)]
pub struct ResourceArgs {
    /// CPU, as whole cores (`2`) or millicores (`500m`).
    #[arg(long, value_parser = parse_cpu, default_value = "0")]
    pub cpu: u64,
    /// Memory in MB.
    #[arg(long, default_value_t = 0)]
    pub memory_mb: u64,
    /// Disk in GB.
    #[arg(long, default_value_t = 0)]
    pub disk_gb: u64,
}

impl From<ResourceArgs> for Resources {
    fn from(args: ResourceArgs) -> Self {
        Self::new(args.cpu, args.memory_mb, args.disk_gb)
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    On,
    Off,
}

/// Parse a CPU quantity into millicores.
fn parse_cpu(s: &str) -> Result<u64, String> {
    let invalid = || format!("invalid cpu quantity {s:?}; use cores (2) or millicores (500m)");
    if let Some(millis) = s.strip_suffix('m') {
        return millis.parse().map_err(|_| invalid());
    }
    let cores: u64 = s.parse().map_err(|_| invalid())?;
    cores.checked_mul(1000).ok_or_else(invalid)
}

fn parse_state(s: &str) -> Result<HostState, String> {
    HostState::from_name(s).ok_or_else(|| {
        format!("unknown state {s:?}; expected unprovisioned, provisioning, active, error or maintenance")
    })
}
