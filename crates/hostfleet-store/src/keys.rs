//! Key encoding utilities for `RocksDB`.
//!
//! Host IDs are 32 bytes and allocation IDs are 16 bytes, so composite keys
//! have fixed offsets and support prefix scans.

use hostfleet_core::{AllocationId, HostId};

/// Length of an encoded host ID.
pub const HOST_ID_LEN: usize = 32;

/// Length of an encoded allocation ID.
pub const ALLOCATION_ID_LEN: usize = 16;

/// Encode a host key (just the host ID bytes).
#[must_use]
pub fn host_key(host_id: &HostId) -> Vec<u8> {
    host_id.as_bytes().to_vec()
}

/// Encode a status-host index key: `status || host_id`.
#[must_use]
pub fn status_host_key(status: u8, host_id: &HostId) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + HOST_ID_LEN);
    key.push(status);
    key.extend_from_slice(host_id.as_bytes());
    key
}

/// Encode a status prefix for scanning all hosts in a state.
#[must_use]
pub fn status_prefix(status: u8) -> Vec<u8> {
    vec![status]
}

/// Extract the host ID from a status-host key.
///
/// Returns `None` if the key is too short.
#[must_use]
pub fn extract_host_id_from_status_key(key: &[u8]) -> Option<HostId> {
    let bytes: [u8; HOST_ID_LEN] = key.get(1..=HOST_ID_LEN)?.try_into().ok()?;
    Some(HostId::from_bytes(bytes))
}

/// Encode a unique-index key for a management address.
#[must_use]
pub fn ip_key(ip: &str) -> Vec<u8> {
    ip.as_bytes().to_vec()
}

/// Encode a unique-index key for a hostname.
///
/// Hostnames are compared case-insensitively.
#[must_use]
pub fn name_key(name: &str) -> Vec<u8> {
    name.to_ascii_lowercase().into_bytes()
}

/// Decode a host ID stored as an index value.
#[must_use]
pub fn decode_host_id(value: &[u8]) -> Option<HostId> {
    let bytes: [u8; HOST_ID_LEN] = value.try_into().ok()?;
    Some(HostId::from_bytes(bytes))
}

/// Encode an allocation key (just the allocation ID bytes).
#[must_use]
pub fn allocation_key(allocation_id: &AllocationId) -> Vec<u8> {
    allocation_id.as_bytes().to_vec()
}

/// Encode a host-allocation index key: `host_id || allocation_id`.
///
/// This allows efficient prefix scans for all allocations on a host.
#[must_use]
pub fn host_allocation_key(host_id: &HostId, allocation_id: &AllocationId) -> Vec<u8> {
    let mut key = Vec::with_capacity(HOST_ID_LEN + ALLOCATION_ID_LEN);
    key.extend_from_slice(host_id.as_bytes());
    key.extend_from_slice(allocation_id.as_bytes());
    key
}

/// Encode a host prefix for scanning all allocations on a host.
#[must_use]
pub fn host_prefix(host_id: &HostId) -> Vec<u8> {
    host_id.as_bytes().to_vec()
}

/// Extract the allocation ID from a host-allocation key.
///
/// Returns `None` if the key is not exactly 48 bytes.
#[must_use]
pub fn extract_allocation_id_from_host_allocation_key(key: &[u8]) -> Option<AllocationId> {
    if key.len() != HOST_ID_LEN + ALLOCATION_ID_LEN {
        return None;
    }
    let bytes: [u8; ALLOCATION_ID_LEN] = key[HOST_ID_LEN..].try_into().ok()?;
    Some(AllocationId::from_uuid(uuid::Uuid::from_bytes(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_allocation_key_roundtrip() {
        let host_id = HostId::from_bytes([7u8; 32]);
        let allocation_id = AllocationId::generate();

        let key = host_allocation_key(&host_id, &allocation_id);
        assert_eq!(key.len(), 48);
        assert!(key.starts_with(&host_prefix(&host_id)));

        let extracted = extract_allocation_id_from_host_allocation_key(&key).unwrap();
        assert_eq!(extracted, allocation_id);
    }

    #[test]
    fn status_key_roundtrip() {
        let host_id = HostId::from_bytes([3u8; 32]);
        let key = status_host_key(3, &host_id);
        assert_eq!(key.len(), 33);
        assert_eq!(key[0], 3);
        assert_eq!(extract_host_id_from_status_key(&key), Some(host_id));
        assert_eq!(extract_host_id_from_status_key(&key[..10]), None);
    }

    #[test]
    fn name_key_is_case_insensitive() {
        assert_eq!(name_key("Rack1-Node04"), name_key("rack1-node04"));
        assert_ne!(ip_key("10.0.0.1"), ip_key("10.0.0.10"));
    }

    #[test]
    fn truncated_keys_are_rejected() {
        assert!(extract_allocation_id_from_host_allocation_key(&[0u8; 40]).is_none());
        assert!(decode_host_id(&[0u8; 31]).is_none());
        assert!(decode_host_id(&[0u8; 32]).is_some());
    }
}
