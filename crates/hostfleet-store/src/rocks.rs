//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::Arc;

use hostfleet_core::{AllocationId, HostId};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::types::{Allocation, Host, HostState};
use crate::Store;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Collect every key in `cf_name` that starts with `prefix`.
    fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<Box<[u8]>>> {
        let handle = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&handle, IteratorMode::From(prefix, Direction::Forward));

        let mut found = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            found.push(key);
        }
        Ok(found)
    }

    /// Resolve a unique index entry to the host it points at.
    fn lookup_index(&self, cf_name: &str, key: &[u8]) -> Result<Option<HostId>> {
        let handle = self.cf(cf_name)?;
        let Some(value) = self.db.get_cf(&handle, key)? else {
            return Ok(None);
        };
        keys::decode_host_id(&value)
            .map(Some)
            .ok_or_else(|| StoreError::Serialization(format!("corrupt {cf_name} entry")))
    }

    /// Stage a host record and its index entries into `batch`.
    ///
    /// Stale index entries from the previous version of the record are removed.
    fn stage_host(&self, batch: &mut WriteBatch, host: &Host) -> Result<()> {
        let cf_hosts = self.cf(cf::HOSTS)?;
        let cf_by_status = self.cf(cf::HOSTS_BY_STATUS)?;
        let cf_by_ip = self.cf(cf::HOSTS_BY_IP)?;
        let cf_by_name = self.cf(cf::HOSTS_BY_NAME)?;

        let ip_key = keys::ip_key(&host.ip);
        let name_key = keys::name_key(&host.name);

        if let Some(owner) = self.lookup_index(cf::HOSTS_BY_IP, &ip_key)? {
            if owner != host.host_id {
                return Err(StoreError::Conflict {
                    index: "ip",
                    value: host.ip.clone(),
                });
            }
        }
        if let Some(owner) = self.lookup_index(cf::HOSTS_BY_NAME, &name_key)? {
            if owner != host.host_id {
                return Err(StoreError::Conflict {
                    index: "name",
                    value: host.name.clone(),
                });
            }
        }

        if let Some(old) = self.get_host(&host.host_id)? {
            if old.status != host.status {
                batch.delete_cf(
                    &cf_by_status,
                    keys::status_host_key(old.status.as_u8(), &host.host_id),
                );
            }
            let old_ip_key = keys::ip_key(&old.ip);
            if old_ip_key != ip_key {
                batch.delete_cf(&cf_by_ip, old_ip_key);
            }
            let old_name_key = keys::name_key(&old.name);
            if old_name_key != name_key {
                batch.delete_cf(&cf_by_name, old_name_key);
            }
        }

        let host_id_bytes = host.host_id.as_bytes();
        batch.put_cf(
            &cf_hosts,
            keys::host_key(&host.host_id),
            Self::serialize(host)?,
        );
        batch.put_cf(
            &cf_by_status,
            keys::status_host_key(host.status.as_u8(), &host.host_id),
            [],
        );
        batch.put_cf(&cf_by_ip, ip_key, host_id_bytes);
        batch.put_cf(&cf_by_name, name_key, host_id_bytes);
        Ok(())
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Host Operations
    // =========================================================================

    fn put_host(&self, host: &Host) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_host(&mut batch, host)?;
        self.db.write(batch)?;
        Ok(())
    }

    fn get_host(&self, host_id: &HostId) -> Result<Option<Host>> {
        let cf = self.cf(cf::HOSTS)?;
        self.db
            .get_cf(&cf, keys::host_key(host_id))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn find_host_by_ip(&self, ip: &str) -> Result<Option<Host>> {
        match self.lookup_index(cf::HOSTS_BY_IP, &keys::ip_key(ip))? {
            Some(host_id) => self.get_host(&host_id),
            None => Ok(None),
        }
    }

    fn find_host_by_name(&self, name: &str) -> Result<Option<Host>> {
        match self.lookup_index(cf::HOSTS_BY_NAME, &keys::name_key(name))? {
            Some(host_id) => self.get_host(&host_id),
            None => Ok(None),
        }
    }

    fn list_hosts(&self) -> Result<Vec<Host>> {
        let cf = self.cf(cf::HOSTS)?;

        let mut hosts = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            hosts.push(Self::deserialize(&value)?);
        }
        Ok(hosts)
    }

    fn list_hosts_by_status(&self, status: HostState) -> Result<Vec<Host>> {
        let prefix = keys::status_prefix(status.as_u8());

        let mut hosts = Vec::new();
        for key in self.scan_prefix(cf::HOSTS_BY_STATUS, &prefix)? {
            let Some(host_id) = keys::extract_host_id_from_status_key(&key) else {
                continue;
            };
            if let Some(host) = self.get_host(&host_id)? {
                hosts.push(host);
            }
        }
        Ok(hosts)
    }

    fn update_host_status(
        &self,
        host_id: &HostId,
        status: HostState,
        error_message: Option<String>,
    ) -> Result<Host> {
        let mut host = self.get_host(host_id)?.ok_or(StoreError::NotFound)?;
        host.status = status;
        host.error_message = error_message;
        host.updated_at = chrono::Utc::now();
        self.put_host(&host)?;
        Ok(host)
    }

    fn delete_host(&self, host_id: &HostId) -> Result<usize> {
        let cf_hosts = self.cf(cf::HOSTS)?;
        let cf_by_status = self.cf(cf::HOSTS_BY_STATUS)?;
        let cf_by_ip = self.cf(cf::HOSTS_BY_IP)?;
        let cf_by_name = self.cf(cf::HOSTS_BY_NAME)?;
        let cf_allocations = self.cf(cf::ALLOCATIONS)?;
        let cf_by_host = self.cf(cf::ALLOCATIONS_BY_HOST)?;

        let host = self.get_host(host_id)?.ok_or(StoreError::NotFound)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_hosts, keys::host_key(host_id));
        batch.delete_cf(
            &cf_by_status,
            keys::status_host_key(host.status.as_u8(), host_id),
        );
        batch.delete_cf(&cf_by_ip, keys::ip_key(&host.ip));
        batch.delete_cf(&cf_by_name, keys::name_key(&host.name));

        let index_keys = self.scan_prefix(cf::ALLOCATIONS_BY_HOST, &keys::host_prefix(host_id))?;
        let removed = index_keys.len();
        for key in index_keys {
            if let Some(allocation_id) = keys::extract_allocation_id_from_host_allocation_key(&key)
            {
                batch.delete_cf(&cf_allocations, keys::allocation_key(&allocation_id));
            }
            batch.delete_cf(&cf_by_host, key);
        }

        self.db.write(batch)?;
        debug!(host_id = %host_id, removed, "Deleted host record");
        Ok(removed)
    }

    // =========================================================================
    // Allocation Operations
    // =========================================================================

    fn get_allocation(&self, allocation_id: &AllocationId) -> Result<Option<Allocation>> {
        let cf = self.cf(cf::ALLOCATIONS)?;
        self.db
            .get_cf(&cf, keys::allocation_key(allocation_id))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn list_allocations_by_host(&self, host_id: &HostId) -> Result<Vec<Allocation>> {
        let prefix = keys::host_prefix(host_id);

        let mut allocations = Vec::new();
        for key in self.scan_prefix(cf::ALLOCATIONS_BY_HOST, &prefix)? {
            let Some(allocation_id) = keys::extract_allocation_id_from_host_allocation_key(&key)
            else {
                continue;
            };
            if let Some(allocation) = self.get_allocation(&allocation_id)? {
                allocations.push(allocation);
            }
        }
        allocations.sort_by_key(|a| a.created_at);
        Ok(allocations)
    }

    fn commit_allocation(&self, host: &Host, allocation: &Allocation) -> Result<()> {
        let cf_allocations = self.cf(cf::ALLOCATIONS)?;
        let cf_by_host = self.cf(cf::ALLOCATIONS_BY_HOST)?;

        let mut batch = WriteBatch::default();
        self.stage_host(&mut batch, host)?;
        batch.put_cf(
            &cf_allocations,
            keys::allocation_key(&allocation.allocation_id),
            Self::serialize(allocation)?,
        );
        batch.put_cf(
            &cf_by_host,
            keys::host_allocation_key(&allocation.host_id, &allocation.allocation_id),
            [],
        );

        self.db.write(batch)?;
        Ok(())
    }

    fn commit_deallocation(&self, host: &Host, allocation_id: &AllocationId) -> Result<()> {
        let cf_allocations = self.cf(cf::ALLOCATIONS)?;
        let cf_by_host = self.cf(cf::ALLOCATIONS_BY_HOST)?;

        let allocation = self
            .get_allocation(allocation_id)?
            .ok_or(StoreError::NotFound)?;

        let mut batch = WriteBatch::default();
        self.stage_host(&mut batch, host)?;
        batch.delete_cf(&cf_allocations, keys::allocation_key(allocation_id));
        batch.delete_cf(
            &cf_by_host,
            keys::host_allocation_key(&allocation.host_id, allocation_id),
        );

        self.db.write(batch)?;
        Ok(())
    }
}
