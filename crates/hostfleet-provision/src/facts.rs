//! Host facts gathered by the runner.
//!
//! Only the handful of facts that feed capacity and inventory are extracted.
//! Each one is optional: a fact that is absent, zero or malformed leaves the
//! corresponding field as `None` so the caller keeps its existing value.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const GIB: u128 = 1 << 30;

/// Block device name prefixes that never count toward disk capacity.
const VIRTUAL_DEVICE_PREFIXES: [&str; 3] = ["loop", "ram", "sr"];

/// Capacity and inventory facts reported for a host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFacts {
    /// Number of virtual CPUs.
    pub cpu_cores: Option<u64>,
    /// Total memory in megabytes.
    pub memory_mb: Option<u64>,
    /// Total size of physical block devices, floored to whole GiB.
    pub disk_gb: Option<u64>,
    /// Distribution name and version, e.g. `Ubuntu 22.04`.
    pub distribution: Option<String>,
}

impl HostFacts {
    /// Extract facts from an Ansible `ansible_facts` mapping.
    #[must_use]
    pub fn from_ansible(facts: &Map<String, Value>) -> Self {
        let cpu_cores = facts
            .get("ansible_processor_vcpus")
            .and_then(as_u64)
            .filter(|n| *n > 0);
        let memory_mb = facts
            .get("ansible_memtotal_mb")
            .and_then(as_u64)
            .filter(|n| *n > 0);
        let disk_gb = facts
            .get("ansible_devices")
            .and_then(Value::as_object)
            .filter(|devices| !devices.is_empty())
            .map(physical_disk_gib);
        let distribution = facts
            .get("ansible_distribution")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(|name| {
                let version = facts
                    .get("ansible_distribution_version")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                format!("{name} {version}").trim_end().to_string()
            });

        Self {
            cpu_cores,
            memory_mb,
            disk_gb,
            distribution,
        }
    }

    /// Returns true if no fact was reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cpu_cores.is_none()
            && self.memory_mb.is_none()
            && self.disk_gb.is_none()
            && self.distribution.is_none()
    }
}

/// Sum device sizes in bytes, skipping virtual devices, and floor to GiB.
fn physical_disk_gib(devices: &Map<String, Value>) -> u64 {
    let bytes: u128 = devices
        .iter()
        .filter(|(name, _)| {
            !VIRTUAL_DEVICE_PREFIXES
                .iter()
                .any(|prefix| name.starts_with(prefix))
        })
        .map(|(_, details)| device_bytes(details).unwrap_or(0))
        .sum();

    u64::try_from(bytes / GIB).unwrap_or(u64::MAX)
}

/// Size of one device in bytes.
///
/// Ansible reports `sectors` and `sectorsize` as exact counts and `size` as
/// a rounded display string (`476.94 GB`); the exact counts win.
fn device_bytes(details: &Value) -> Option<u128> {
    let sectors = details.get("sectors").and_then(as_u64);
    let sector_size = details.get("sectorsize").and_then(as_u64);
    if let (Some(sectors), Some(sector_size)) = (sectors, sector_size) {
        if sectors > 0 && sector_size > 0 {
            return Some(u128::from(sectors) * u128::from(sector_size));
        }
    }

    let size = details.get("size")?;
    as_u64(size)
        .map(u128::from)
        .or_else(|| size.as_str().and_then(parse_human_size))
}

/// Parse Ansible's human-readable sizes, which use 1024-based units.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn parse_human_size(text: &str) -> Option<u128> {
    const UNITS: [(&str, i32); 6] = [
        ("PB", 5),
        ("TB", 4),
        ("GB", 3),
        ("MB", 2),
        ("KB", 1),
        ("bytes", 0),
    ];

    let text = text.trim();
    let (number, exponent) = UNITS.iter().find_map(|(suffix, exponent)| {
        text.strip_suffix(suffix)
            .map(|number| (number.trim(), *exponent))
    })?;
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * 1024_f64.powi(exponent)) as u128)
}

/// Accept either a JSON number or a numeric string.
fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
