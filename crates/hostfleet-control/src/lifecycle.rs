//! Host lifecycle state machine.
//!
//! This module defines the valid state transitions for hosts and the state
//! gates each operation checks before it mutates anything.
//!
//! # State Machine
//!
//! ```text
//!   ┌───────────────┐  provision   ┌──────────────┐   success   ┌──────────┐
//!   │ Unprovisioned │─────────────▶│ Provisioning │────────────▶│  Active  │
//!   └───────────────┘              └──────┬───────┘◀────────────└────┬─────┘
//!                                         │ failure   setup_vm_host  │
//!                       provision (retry) ▼                          │
//!                                   ┌──────────┐                     │
//!                                   │  Error   │                     │
//!                                   └──────────┘                     │
//!
//!   any state ──set_maintenance(true)──▶ Maintenance ──set_maintenance(false)──▶ Active
//! ```

use std::fmt;

use hostfleet_core::HostId;
use hostfleet_store::{Host, HostState};
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, Result};

/// Operations gated by lifecycle state, named in conflict errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Run the provisioning playbook.
    Provision,
    /// Run the VM host setup playbook.
    SetupVmHost,
    /// Reserve resources.
    Allocate,
    /// Reserve resources for a virtual machine.
    AllocateVm,
    /// Remove the host record.
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Provision => "provision",
            Self::SetupVmHost => "set up vm host on",
            Self::Allocate => "allocate on",
            Self::AllocateVm => "place vm on",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Validates a state transition and returns the target state if valid.
///
/// # Errors
///
/// Returns `ControlError::Internal` if the transition is not in the table;
/// callers gate operations with [`ensure_allowed`] first, so reaching this
/// is a logic error.
pub fn validate_transition(host_id: &HostId, from: HostState, to: HostState) -> Result<HostState> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(ControlError::Internal(format!(
            "invalid transition for host {host_id}: {from} -> {to}"
        )))
    }
}

/// Check if a state transition is valid according to the state machine.
#[must_use]
pub const fn is_valid_transition(from: HostState, to: HostState) -> bool {
    use HostState::{Active, Error, Maintenance, Provisioning, Unprovisioned};

    matches!(
        (from, to),
        // provision (first attempt or retry) and setup_vm_host
        (Unprovisioned | Error | Active, Provisioning)
            // outcome of a runner call
            | (Provisioning, Active | Error)
            // operator hold
            | (Unprovisioned | Provisioning | Active | Error, Maintenance)
            | (Maintenance, Active)
    )
}

/// Returns the list of valid target states from the given state.
#[must_use]
pub fn valid_transitions_from(state: HostState) -> Vec<HostState> {
    use HostState::{Active, Error, Maintenance, Provisioning, Unprovisioned};

    match state {
        Unprovisioned | Error | Active => vec![Provisioning, Maintenance],
        Provisioning => vec![Active, Error, Maintenance],
        Maintenance => vec![Active],
    }
}

/// Returns true if `provision` may start from this state.
#[must_use]
pub const fn can_provision(state: HostState) -> bool {
    matches!(state, HostState::Unprovisioned | HostState::Error)
}

/// Returns true if `setup_vm_host` may start from this state.
#[must_use]
pub const fn can_setup_vm_host(state: HostState) -> bool {
    matches!(state, HostState::Active)
}

/// Returns true if the host accepts new allocations in this state.
#[must_use]
pub const fn accepts_allocations(state: HostState) -> bool {
    matches!(state, HostState::Active)
}

/// Reject `operation` if the host's state does not permit it.
///
/// # Errors
///
/// Returns `ControlError::StateConflict` naming the operation and state.
pub fn ensure_allowed(host: &Host, operation: Operation) -> Result<()> {
    let state = host.status;
    let reason = match operation {
        Operation::Provision if !can_provision(state) => match state {
            HostState::Active => "host is already provisioned",
            HostState::Provisioning => "a provisioning run is already in progress",
            _ => "host is held for maintenance",
        },
        Operation::SetupVmHost if !can_setup_vm_host(state) => "host must be active",
        Operation::Allocate | Operation::AllocateVm if !accepts_allocations(state) => {
            "host is not active"
        }
        Operation::AllocateVm if !host.is_vm_host => "host is not set up as a vm host",
        _ => return Ok(()),
    };

    Err(ControlError::StateConflict {
        host_id: host.host_id,
        state,
        operation,
        reason: reason.to_string(),
    })
}
