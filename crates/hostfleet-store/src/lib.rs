//! `RocksDB` storage layer for hostfleet.
//!
//! This crate persists the host inventory and the resource allocations made
//! against it, using `RocksDB` column families for indexing.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `hosts`: Primary host records, keyed by `host_id`
//! - `hosts_by_status`: Index for listing hosts by lifecycle state
//! - `hosts_by_ip`: Unique index from management address to `host_id`
//! - `hosts_by_name`: Unique index from hostname to `host_id`
//! - `allocations`: Primary allocation records, keyed by `allocation_id`
//! - `allocations_by_host`: Index for listing allocations on a host
//!
//! A host's `allocated` total and its allocation records are always written
//! together in a single `WriteBatch`, so a crash can never leave one without
//! the other.
//!
//! # Example
//!
//! ```no_run
//! use hostfleet_store::{HostState, RocksStore, Store};
//!
//! let store = RocksStore::open("/tmp/hostfleet-db").unwrap();
//!
//! for host in store.list_hosts_by_status(HostState::Active).unwrap() {
//!     println!("{} {}", host.name, host.available());
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;
pub use types::{Allocation, HealthStatus, Host, HostState, Reference, SshAuth};

use hostfleet_core::{AllocationId, HostId};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer so the control plane can be tested
/// against any backend.
pub trait Store: Send + Sync {
    // =========================================================================
    // Host Operations
    // =========================================================================

    /// Insert or update a host record.
    ///
    /// This also maintains the status, address and hostname indexes.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the address or hostname already
    /// belongs to a different host.
    fn put_host(&self, host: &Host) -> Result<()>;

    /// Get a host by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_host(&self, host_id: &HostId) -> Result<Option<Host>>;

    /// Look up a host by its management address.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_host_by_ip(&self, ip: &str) -> Result<Option<Host>>;

    /// Look up a host by hostname (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_host_by_name(&self, name: &str) -> Result<Option<Host>>;

    /// List every host in the inventory.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_hosts(&self) -> Result<Vec<Host>>;

    /// List all hosts in a given lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_hosts_by_status(&self, status: HostState) -> Result<Vec<Host>>;

    /// Set a host's lifecycle state and error detail, returning the updated record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the host doesn't exist.
    fn update_host_status(
        &self,
        host_id: &HostId,
        status: HostState,
        error_message: Option<String>,
    ) -> Result<Host>;

    /// Delete a host together with every allocation recorded against it.
    ///
    /// Returns the number of allocation records removed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the host doesn't exist.
    fn delete_host(&self, host_id: &HostId) -> Result<usize>;

    // =========================================================================
    // Allocation Operations
    // =========================================================================

    /// Get an allocation by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_allocation(&self, allocation_id: &AllocationId) -> Result<Option<Allocation>>;

    /// List all allocations recorded against a host.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_allocations_by_host(&self, host_id: &HostId) -> Result<Vec<Allocation>>;

    /// Atomically write a new allocation and the host record carrying its debit.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn commit_allocation(&self, host: &Host, allocation: &Allocation) -> Result<()>;

    /// Atomically remove an allocation and write the host record carrying its credit.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the allocation doesn't exist.
    fn commit_deallocation(&self, host: &Host, allocation_id: &AllocationId) -> Result<()>;
}
