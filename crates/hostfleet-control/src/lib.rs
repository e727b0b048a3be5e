//! Control layer for hostfleet bare-metal host management.
//!
//! This crate owns the business rules: the host lifecycle state machine, the
//! per-host capacity ledger, and the utilization report. It coordinates the
//! storage layer with the provisioning runner.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        hostfleet CLI                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     HostControlService                      │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │  Inventory  │ │  Capacity   │ │    Lifecycle        │    │
//! │  │  + Report   │ │  Ledger     │ │    State Machine    │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! │                 per-host exclusive guards                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                ┌─────────────┴─────────────┐
//!                ▼                           ▼
//!         ┌──────────┐                ┌────────────┐
//!         │  Store   │                │   Runner   │
//!         │ (RocksDB)│                │  (Ansible) │
//!         └──────────┘                └────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use hostfleet_control::{HostControl, HostControlService, RegisterHostRequest};
//! use hostfleet_provision::{AnsibleRunner, RunnerConfig};
//! use hostfleet_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/hostfleet")?);
//! let runner = Arc::new(AnsibleRunner::new(RunnerConfig::default()));
//! let control = HostControlService::with_defaults(store, runner);
//!
//! let host = control
//!     .register_host(RegisterHostRequest::new("node-1", "10.0.0.1"))
//!     .await?;
//! let result = control.provision(&host.host_id).await?;
//!
//! println!("{}: {}", host.name, result.message);
//! # Ok(())
//! # }
//! ```
//!
//! # State Machine
//!
//! - `Unprovisioned` → `Provisioning` (provision)
//! - `Provisioning` → `Active` (runner succeeded) or `Error` (runner failed)
//! - `Error` → `Provisioning` (retry)
//! - `Active` → `Provisioning` (VM host setup)
//! - any state except `Maintenance` → `Maintenance`
//! - `Maintenance` → `Active`
//!
//! Only `Active` hosts accept allocations. See the [`lifecycle`] module for
//! the transition table.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod locks;
pub mod report;
pub mod service;
pub mod types;

pub use error::{ControlError, ErrorKind, Result};
pub use lifecycle::Operation;
pub use service::{HostControl, HostControlService, INTERRUPTED_MESSAGE};
pub use types::{
    AllocationRequest, ControlConfig, HostDetails, OperationFailure, OperationResult,
    OperationStatus, ReconcileOutcome, RegisterHostRequest, ReportFilter, UsageSummary,
    UtilizationRow,
};

// Re-export commonly used types from dependencies for convenience
pub use hostfleet_core::{AllocationId, Dimension, HostId, Resources};
pub use hostfleet_store::{Allocation, HealthStatus, Host, HostState, Reference, SshAuth};
