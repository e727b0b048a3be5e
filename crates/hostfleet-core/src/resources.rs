//! Exact resource quantities for the capacity ledger.
//!
//! All accounting is integer arithmetic: CPU in millicores, memory in
//! megabytes, disk in gigabytes. Floating point only appears when a
//! percentage is rendered for display.

use std::fmt;
use std::iter::Sum;

use serde::{Deserialize, Serialize};

/// A quantity of host resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Resources {
    /// CPU in millicores (1000 = one vCPU).
    pub cpu_millicores: u64,
    /// Memory in megabytes.
    pub memory_mb: u64,
    /// Disk in gigabytes.
    pub disk_gb: u64,
}

/// One of the three accounted resource dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// CPU, in millicores.
    Cpu,
    /// Memory, in megabytes.
    Memory,
    /// Disk, in gigabytes.
    Disk,
}

impl Dimension {
    /// All dimensions in reporting order.
    pub const ALL: [Self; 3] = [Self::Cpu, Self::Memory, Self::Disk];

    /// Unit suffix used in messages.
    #[must_use]
    pub const fn unit(self) -> &'static str {
        match self {
            Self::Cpu => "m",
            Self::Memory => "MB",
            Self::Disk => "GB",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Disk => "disk",
        };
        f.write_str(name)
    }
}

/// The first dimension on which a request exceeds what is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    /// The exhausted dimension.
    pub dimension: Dimension,
    /// Amount requested on that dimension.
    pub requested: u64,
    /// Amount available on that dimension.
    pub available: u64,
}

impl Resources {
    /// No resources at all.
    pub const ZERO: Self = Self::new(0, 0, 0);

    /// Create a quantity from raw units.
    #[must_use]
    pub const fn new(cpu_millicores: u64, memory_mb: u64, disk_gb: u64) -> Self {
        Self {
            cpu_millicores,
            memory_mb,
            disk_gb,
        }
    }

    /// Create a quantity from whole CPU cores.
    #[must_use]
    pub const fn from_cores(cores: u64, memory_mb: u64, disk_gb: u64) -> Self {
        Self::new(cores.saturating_mul(1000), memory_mb, disk_gb)
    }

    /// Amount on a single dimension.
    #[must_use]
    pub const fn get(&self, dimension: Dimension) -> u64 {
        match dimension {
            Dimension::Cpu => self.cpu_millicores,
            Dimension::Memory => self.memory_mb,
            Dimension::Disk => self.disk_gb,
        }
    }

    /// Returns true if every dimension is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.cpu_millicores == 0 && self.memory_mb == 0 && self.disk_gb == 0
    }

    /// Subtract dimension-wise, or `None` if any dimension would go negative.
    #[must_use]
    pub fn checked_sub(self, other: Self) -> Option<Self> {
        Some(Self {
            cpu_millicores: self.cpu_millicores.checked_sub(other.cpu_millicores)?,
            memory_mb: self.memory_mb.checked_sub(other.memory_mb)?,
            disk_gb: self.disk_gb.checked_sub(other.disk_gb)?,
        })
    }

    /// Subtract dimension-wise, clamping each dimension at zero.
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self {
            cpu_millicores: self.cpu_millicores.saturating_sub(other.cpu_millicores),
            memory_mb: self.memory_mb.saturating_sub(other.memory_mb),
            disk_gb: self.disk_gb.saturating_sub(other.disk_gb),
        }
    }

    /// Add dimension-wise, or `None` on overflow.
    #[must_use]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        Some(Self {
            cpu_millicores: self.cpu_millicores.checked_add(other.cpu_millicores)?,
            memory_mb: self.memory_mb.checked_add(other.memory_mb)?,
            disk_gb: self.disk_gb.checked_add(other.disk_gb)?,
        })
    }

    /// Add dimension-wise, clamping at `u64::MAX`.
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self {
            cpu_millicores: self.cpu_millicores.saturating_add(other.cpu_millicores),
            memory_mb: self.memory_mb.saturating_add(other.memory_mb),
            disk_gb: self.disk_gb.saturating_add(other.disk_gb),
        }
    }

    /// Returns the first dimension on which `requested` exceeds `self`.
    #[must_use]
    pub fn shortfall(&self, requested: &Self) -> Option<Shortfall> {
        Dimension::ALL.into_iter().find_map(|dimension| {
            let want = requested.get(dimension);
            let have = self.get(dimension);
            (want > have).then_some(Shortfall {
                dimension,
                requested: want,
                available: have,
            })
        })
    }

    /// Returns true if `self` fits inside `capacity` on every dimension.
    #[must_use]
    pub fn fits_within(&self, capacity: &Self) -> bool {
        capacity.shortfall(self).is_none()
    }

    /// CPU expressed in cores, e.g. `1500m` is `1.5`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cpu_cores(&self) -> f64 {
        self.cpu_millicores as f64 / 1000.0
    }
}

impl Sum for Resources {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Self::saturating_add)
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu={}m memory={}MB disk={}GB",
            self.cpu_millicores, self.memory_mb, self.disk_gb
        )
    }
}

/// Percentage of `total` that `used` represents, rounded to two decimals.
///
/// Returns `0.0` when `total` is zero.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn usage_percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = used as f64 / total as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}
