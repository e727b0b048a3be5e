//! Core identifier types for hostfleet.
//!
//! This module provides strongly-typed identifiers for hosts and allocations.
//! All IDs are designed for efficient storage and lookup.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 32-byte host identifier, generated via blake3 hash.
///
/// Host IDs are derived from the hostname, the management address and a
/// timestamp, so re-registering a decommissioned machine yields a new ID.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HostId([u8; 32]);

impl HostId {
    /// Create a new `HostId` from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a new unique `HostId` using blake3.
    #[must_use]
    pub fn generate(hostname: &str, ip: &str) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();

        let mut hasher = blake3::Hasher::new();
        hasher.update(hostname.as_bytes());
        hasher.update(&[0]);
        hasher.update(ip.as_bytes());
        hasher.update(&timestamp.to_le_bytes());

        Self(*hasher.finalize().as_bytes())
    }

    /// Generate a deterministic `HostId` for testing.
    #[must_use]
    pub fn generate_deterministic(hostname: &str, ip: &str, seed: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(hostname.as_bytes());
        hasher.update(&[0]);
        hasher.update(ip.as_bytes());
        hasher.update(&seed.to_le_bytes());

        Self(*hasher.finalize().as_bytes())
    }

    /// Parse a `HostId` from a hex-encoded string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid hex or not exactly 64 characters.
    pub fn from_hex(s: &str) -> Result<Self, IdError> {
        let bytes = hex::decode(s).map_err(|_| IdError::InvalidHex)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| IdError::InvalidLength {
            expected: 32,
            got: s.len() / 2,
        })?;
        Ok(Self(arr))
    }

    /// Return the underlying bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Return the hex-encoded string representation.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostId({})", self.to_hex())
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for HostId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for HostId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<HostId> for String {
    fn from(id: HostId) -> Self {
        id.to_hex()
    }
}

impl AsRef<[u8]> for HostId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A 16-byte allocation identifier based on UUID v4.
///
/// Allocation IDs are randomly generated for each reservation and are never reused,
/// so a released ID can never be credited back twice.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AllocationId(uuid::Uuid);

impl AllocationId {
    /// Create a new `AllocationId` from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a new random `AllocationId`.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Return the bytes of the UUID.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl FromStr for AllocationId {
    type Err = IdError;

    /// Parse an `AllocationId` from a UUID string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = uuid::Uuid::parse_str(s).map_err(|_| IdError::InvalidUuid)?;
        Ok(Self(uuid))
    }
}

impl fmt::Debug for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AllocationId({})", self.0)
    }
}

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for AllocationId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AllocationId> for String {
    fn from(id: AllocationId) -> Self {
        id.0.to_string()
    }
}

impl AsRef<[u8]> for AllocationId {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input string contains invalid hexadecimal characters.
    #[error("invalid hex encoding")]
    InvalidHex,

    /// The input has an incorrect length.
    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// The expected number of bytes.
        expected: usize,
        /// The actual number of bytes.
        got: usize,
    },

    /// The input is not a valid UUID.
    #[error("invalid UUID format")]
    InvalidUuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_id_hex_parse() {
        let id = HostId::from_bytes([0x42u8; 32]);
        let parsed: HostId = id.to_hex().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn host_id_invalid_hex() {
        let result = HostId::from_hex("not-valid-hex");
        assert!(matches!(result, Err(IdError::InvalidHex)));
    }

    #[test]
    fn host_id_wrong_length() {
        let result = HostId::from_hex("deadbeef");
        assert!(matches!(result, Err(IdError::InvalidLength { .. })));
    }

    #[test]
    fn host_id_deterministic() {
        let id1 = HostId::generate_deterministic("node-1", "10.0.0.1", 7);
        let id2 = HostId::generate_deterministic("node-1", "10.0.0.1", 7);
        assert_eq!(id1, id2);

        let id3 = HostId::generate_deterministic("node-1", "10.0.0.1", 8);
        assert_ne!(id1, id3);
    }

    #[test]
    fn host_id_separates_name_and_address() {
        // "ab" + "c" must not collide with "a" + "bc"
        let id1 = HostId::generate_deterministic("ab", "c", 1);
        let id2 = HostId::generate_deterministic("a", "bc", 1);
        assert_ne!(id1, id2);
    }

    #[test]
    fn host_id_unique() {
        let id1 = HostId::generate("node-1", "10.0.0.1");
        let id2 = HostId::generate("node-1", "10.0.0.1");
        // Due to timestamp, these should be different (with high probability)
        assert_ne!(id1, id2);
    }

    #[test]
    fn allocation_id_invalid_uuid() {
        let result = AllocationId::from_str("not-a-uuid");
        assert!(matches!(result, Err(IdError::InvalidUuid)));
    }

    #[test]
    fn ids_serialize_as_strings() {
        let host_id = HostId::generate_deterministic("node", "10.0.0.9", 42);
        let json = serde_json::to_string(&host_id).unwrap();
        assert_eq!(json, format!("\"{}\"", host_id.to_hex()));
        let parsed: HostId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, host_id);

        let allocation_id = AllocationId::generate();
        let json = serde_json::to_string(&allocation_id).unwrap();
        let parsed: AllocationId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, allocation_id);
    }
}
