//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary host records, keyed by `host_id`.
    pub const HOSTS: &str = "hosts";

    /// Index: hosts by lifecycle state, keyed by `state || host_id`.
    pub const HOSTS_BY_STATUS: &str = "hosts_by_status";

    /// Unique index: management address to `host_id`.
    pub const HOSTS_BY_IP: &str = "hosts_by_ip";

    /// Unique index: hostname to `host_id`.
    pub const HOSTS_BY_NAME: &str = "hosts_by_name";

    /// Primary allocation records, keyed by `allocation_id`.
    pub const ALLOCATIONS: &str = "allocations";

    /// Index: allocations by host, keyed by `host_id || allocation_id`.
    pub const ALLOCATIONS_BY_HOST: &str = "allocations_by_host";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::HOSTS,
        cf::HOSTS_BY_STATUS,
        cf::HOSTS_BY_IP,
        cf::HOSTS_BY_NAME,
        cf::ALLOCATIONS,
        cf::ALLOCATIONS_BY_HOST,
    ]
}
