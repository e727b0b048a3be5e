//! Core types and utilities for hostfleet.
//!
//! This crate provides the foundational types used throughout the hostfleet workspace:
//!
//! - **Identifiers**: Strongly-typed IDs for hosts and allocations
//! - **Resources**: Exact CPU/memory/disk quantities used by the resource ledger
//! - **Identifier errors**: Parse failures shared across crates
//!
//! # Example
//!
//! ```
//! use hostfleet_core::{AllocationId, HostId, Resources};
//!
//! // Generate a host ID from its hostname and address
//! let host_id = HostId::generate("rack1-node04", "10.0.4.4");
//!
//! // Generate an allocation ID
//! let allocation_id = AllocationId::generate();
//!
//! // 2 vCPUs, 4 GiB of memory, 50 GB of disk
//! let request = Resources::from_cores(2, 4096, 50);
//! assert_eq!(request.cpu_millicores, 2000);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod ids;
pub mod resources;

pub use ids::{AllocationId, HostId, IdError};
pub use resources::{usage_percent, Dimension, Resources, Shortfall};
