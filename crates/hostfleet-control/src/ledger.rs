//! Capacity ledger arithmetic.
//!
//! These functions compute the next `allocated` counters for a host without
//! touching storage. The service applies them while holding the host guard
//! and persists the result together with the allocation record.

use hostfleet_core::Resources;
use hostfleet_store::{Allocation, Host};
use tracing::warn;

use crate::error::{ControlError, Result};
use crate::types::AllocationRequest;

/// Reject requests that cannot be recorded.
///
/// # Errors
///
/// Returns `ControlError::Validation` for an empty purpose.
pub fn validate_request(request: &AllocationRequest) -> Result<()> {
    if request.purpose.trim().is_empty() {
        return Err(ControlError::Validation(
            "allocation purpose must not be empty".to_string(),
        ));
    }
    if let Some(reference) = &request.reference {
        if reference.kind.trim().is_empty() || reference.id.trim().is_empty() {
            return Err(ControlError::Validation(
                "allocation reference needs both a kind and an id".to_string(),
            ));
        }
    }
    Ok(())
}

/// Counters after reserving `requested` on `host`.
///
/// # Errors
///
/// Returns `ControlError::InsufficientCapacity` naming the first dimension
/// where the request exceeds what is available.
pub fn debit(host: &Host, requested: &Resources) -> Result<Resources> {
    if let Some(shortfall) = host.available().shortfall(requested) {
        return Err(ControlError::InsufficientCapacity {
            host_id: host.host_id,
            dimension: shortfall.dimension,
            requested: shortfall.requested,
            available: shortfall.available,
        });
    }
    host.allocated.checked_add(*requested).ok_or_else(|| {
        ControlError::Internal(format!("allocated counters overflow on host {}", host.host_id))
    })
}

/// Counters after releasing `allocation` from `host`.
///
/// A release larger than the recorded counters clamps at zero and is logged;
/// `reconcile` repairs the host afterwards.
#[must_use]
pub fn credit(host: &Host, allocation: &Allocation) -> Resources {
    host.allocated
        .checked_sub(allocation.resources)
        .unwrap_or_else(|| {
            warn!(
                host_id = %host.host_id,
                allocation_id = %allocation.allocation_id,
                allocated = %host.allocated,
                released = %allocation.resources,
                "Release exceeds recorded allocation, clamping at zero"
            );
            host.allocated.saturating_sub(allocation.resources)
        })
}

/// Sum of reserved amounts across allocation records.
#[must_use]
pub fn total_reserved(allocations: &[Allocation]) -> Resources {
    allocations.iter().map(|a| a.resources).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hostfleet_core::{AllocationId, Dimension, HostId};
    use hostfleet_store::{HealthStatus, HostState, Reference, SshAuth};

    fn host(total: Resources, allocated: Resources) -> Host {
        Host {
            host_id: HostId::from_bytes([9u8; 32]),
            name: "node-9".to_string(),
            ip: "10.0.0.9".to_string(),
            ssh_user: "root".to_string(),
            ssh_port: 22,
            auth: SshAuth::Agent,
            status: HostState::Active,
            region: None,
            total,
            allocated,
            is_vm_host: false,
            health: HealthStatus::Unknown,
            last_health_check: None,
            health_error: None,
            os_info: None,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn allocation(resources: Resources) -> Allocation {
        Allocation {
            allocation_id: AllocationId::generate(),
            host_id: HostId::from_bytes([9u8; 32]),
            purpose: "vm".to_string(),
            resources,
            reference: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn debit_within_capacity() {
        let h = host(Resources::from_cores(8, 16384, 500), Resources::ZERO);
        let next = debit(&h, &Resources::from_cores(2, 4096, 50)).unwrap();
        assert_eq!(next, Resources::from_cores(2, 4096, 50));
    }

    #[test]
    fn debit_exact_fit() {
        let h = host(Resources::from_cores(4, 1024, 10), Resources::from_cores(1, 0, 0));
        let next = debit(&h, &Resources::from_cores(3, 1024, 10)).unwrap();
        assert_eq!(next, h.total);
    }

    #[test]
    fn debit_names_exhausted_dimension() {
        let h = host(Resources::from_cores(8, 16384, 500), Resources::ZERO);
        let err = debit(&h, &Resources::from_cores(1, 1024, 501)).unwrap_err();
        match err {
            ControlError::InsufficientCapacity {
                dimension,
                requested,
                available,
                ..
            } => {
                assert_eq!(dimension, Dimension::Disk);
                assert_eq!(requested, 501);
                assert_eq!(available, 500);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn credit_restores_exact_amount() {
        let reserved = Resources::new(1500, 2048, 20);
        let h = host(Resources::from_cores(8, 16384, 500), Resources::new(2500, 4096, 70));
        assert_eq!(credit(&h, &allocation(reserved)), Resources::new(1000, 2048, 50));
    }

    #[test]
    fn credit_clamps_on_drift() {
        let h = host(Resources::from_cores(8, 16384, 500), Resources::new(500, 0, 0));
        assert_eq!(
            credit(&h, &allocation(Resources::new(1000, 10, 0))),
            Resources::ZERO
        );
    }

    #[test]
    fn request_validation() {
        let ok = AllocationRequest::new("vm", Resources::ZERO);
        assert!(validate_request(&ok).is_ok());

        let blank = AllocationRequest::new("  ", Resources::from_cores(1, 1, 1));
        assert!(validate_request(&blank).is_err());

        let bad_ref = AllocationRequest::new("vm", Resources::ZERO)
            .with_reference(Reference::new("virtual_machine", ""));
        assert!(validate_request(&bad_ref).is_err());
    }

    #[test]
    fn reserved_sum() {
        let allocations = vec![
            allocation(Resources::new(500, 512, 5)),
            allocation(Resources::new(1500, 1536, 15)),
        ];
        assert_eq!(total_reserved(&allocations), Resources::new(2000, 2048, 20));
        assert_eq!(total_reserved(&[]), Resources::ZERO);
    }
}
