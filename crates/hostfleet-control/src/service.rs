//! Host control service implementation.
//!
//! This module provides the `HostControl` trait and `HostControlService`
//! implementation that coordinates the inventory, the lifecycle state machine,
//! the capacity ledger and the provisioning runner.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use hostfleet_core::{AllocationId, HostId, Resources};
use hostfleet_provision::{HostFacts, Invocation, RunTarget, Runner, RunnerError, Task};
use hostfleet_store::{
    Allocation, HealthStatus, Host, HostState, Reference, SshAuth, Store, StoreError,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ControlError, Result};
use crate::ledger;
use crate::lifecycle::{self, Operation};
use crate::locks::HostLocks;
use crate::report;
use crate::types::{
    AllocationRequest, ControlConfig, HostDetails, OperationFailure, OperationResult,
    ReconcileOutcome, RegisterHostRequest, ReportFilter, UsageSummary, UtilizationRow,
};

/// Error detail recorded on hosts found mid-provisioning at startup.
pub const INTERRUPTED_MESSAGE: &str = "interrupted: provisioning did not finish before restart";

/// Trait defining the host control operations.
#[async_trait]
pub trait HostControl: Send + Sync {
    // =========================================================================
    // Inventory
    // =========================================================================

    /// Add a host in the `Unprovisioned` state.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Validation` for a blank name, an unparseable
    /// address, a zero port, a missing key path, or a duplicate address or name.
    async fn register_host(&self, request: RegisterHostRequest) -> Result<Host>;

    /// Get a host by ID.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::HostNotFound` if the host doesn't exist.
    async fn get_host(&self, host_id: &HostId) -> Result<Host>;

    /// List hosts, optionally restricted to one state, ordered by name.
    async fn list_hosts(&self, status: Option<HostState>) -> Result<Vec<Host>>;

    /// Override a host's advertised capacity.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Validation` if the new total is below the
    /// allocated amount on any dimension.
    async fn update_capacity(&self, host_id: &HostId, total: Resources) -> Result<Host>;

    /// Delete a host that has no allocations.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::StateConflict` while allocations exist.
    async fn delete_host(&self, host_id: &HostId) -> Result<()>;

    /// Delete a host together with all of its allocations.
    ///
    /// No capacity is credited; the host itself disappears. Returns the number
    /// of allocations removed.
    async fn delete_host_cascade(&self, host_id: &HostId) -> Result<usize>;

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Run the provisioning playbook and record the gathered capacity.
    ///
    /// Runner failures are recorded on the host and returned as a failed
    /// [`OperationResult`], not as an error.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::StateConflict` unless the host is
    /// `Unprovisioned` or `Error`.
    async fn provision(&self, host_id: &HostId) -> Result<OperationResult>;

    /// Install the VM host stack on an active host.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::StateConflict` unless the host is `Active`.
    async fn setup_vm_host(&self, host_id: &HostId) -> Result<OperationResult>;

    /// Put a host into or take it out of maintenance.
    async fn set_maintenance(&self, host_id: &HostId, enabled: bool) -> Result<Host>;

    /// Probe reachability. Never changes the lifecycle state.
    async fn check_health(&self, host_id: &HostId) -> Result<OperationResult>;

    /// Move hosts left in `Provisioning` by a previous process to `Error`.
    ///
    /// Returns the hosts that were recovered.
    async fn recover_interrupted(&self) -> Result<Vec<HostId>>;

    // =========================================================================
    // Ledger
    // =========================================================================

    /// Reserve resources on an active host.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InsufficientCapacity` if any dimension does not
    /// fit, and `ControlError::StateConflict` unless the host is `Active`.
    async fn allocate(&self, host_id: &HostId, request: AllocationRequest) -> Result<Allocation>;

    /// Reserve resources for a virtual machine on a VM host.
    async fn allocate_vm(
        &self,
        host_id: &HostId,
        vm_name: &str,
        resources: Resources,
    ) -> Result<Allocation>;

    /// Release an allocation and credit its resources back to the host.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::AllocationNotFound` if it doesn't exist.
    async fn deallocate(&self, allocation_id: &AllocationId) -> Result<Allocation>;

    /// Allocated share of a host's capacity.
    async fn get_usage(&self, host_id: &HostId) -> Result<UsageSummary>;

    /// Allocations recorded against a host.
    async fn list_allocations(&self, host_id: &HostId) -> Result<Vec<Allocation>>;

    /// Host record, allocations and usage in one read.
    async fn host_details(&self, host_id: &HostId) -> Result<HostDetails>;

    /// Recompute a host's allocated counters from its allocation records.
    async fn reconcile(&self, host_id: &HostId) -> Result<ReconcileOutcome>;

    // =========================================================================
    // Reporting
    // =========================================================================

    /// Per-host capacity and utilization rows, ordered by hostname.
    async fn utilization_report(&self, filter: &ReportFilter) -> Result<Vec<UtilizationRow>>;
}

/// The main host control service implementation.
pub struct HostControlService<S: Store, R: Runner> {
    store: Arc<S>,
    runner: Arc<R>,
    config: ControlConfig,
    locks: HostLocks,
    shutdown: CancellationToken,
}

impl<S: Store, R: Runner> HostControlService<S, R> {
    /// Create a new control service.
    #[must_use]
    pub fn new(store: Arc<S>, runner: Arc<R>, config: ControlConfig) -> Self {
        Self {
            store,
            runner,
            config,
            locks: HostLocks::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Create with default configuration.
    #[must_use]
    pub fn with_defaults(store: Arc<S>, runner: Arc<R>) -> Self {
        Self::new(store, runner, ControlConfig::default())
    }

    /// Get a reference to the store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Token that cancels every in-flight runner call when triggered.
    ///
    /// Hosts whose run is cancelled end up in `Error`.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn load(&self, host_id: &HostId) -> Result<Host> {
        self.store
            .get_host(host_id)?
            .ok_or(ControlError::HostNotFound(*host_id))
    }

    /// Perform a validated state transition and persist it.
    fn transition(
        &self,
        host: &mut Host,
        target: HostState,
        error_message: Option<String>,
    ) -> Result<()> {
        lifecycle::validate_transition(&host.host_id, host.status, target)?;
        let from = host.status;
        host.status = target;
        host.error_message = error_message;
        host.updated_at = Utc::now();
        self.store.put_host(host)?;
        info!(host_id = %host.host_id, from = %from, state = %target, "Host state changed");
        Ok(())
    }

    /// Record a failed run: `Provisioning -> Error`.
    fn fail_run(&self, host: &mut Host, failure: OperationFailure) -> Result<OperationResult> {
        let detail = failure.to_string();
        if let Err(e) = self.transition(host, HostState::Error, Some(detail.clone())) {
            error!(host_id = %host.host_id, error = %e, "Failed to record runner failure");
            self.force_error(&host.host_id, detail);
            return Err(e);
        }
        Ok(OperationResult::failed(failure, host.clone()))
    }

    /// Record a finished run: `Provisioning -> Active`.
    fn complete_run(&self, host: &mut Host) -> Result<()> {
        if let Err(e) = self.transition(host, HostState::Active, None) {
            error!(host_id = %host.host_id, error = %e, "Failed to record finished run");
            self.force_error(
                &host.host_id,
                format!("run finished but its result was not recorded: {e}"),
            );
            return Err(e);
        }
        Ok(())
    }

    /// Move a host out of `Provisioning` after a failed lifecycle write.
    ///
    /// Rewrites only the status of the stored record; nothing the run
    /// gathered is kept.
    fn force_error(&self, host_id: &HostId, detail: String) {
        match self
            .store
            .update_host_status(host_id, HostState::Error, Some(detail))
        {
            Ok(_) => warn!(host_id = %host_id, "Host moved to error after failed write"),
            Err(e) => error!(host_id = %host_id, error = %e, "Host left in provisioning"),
        }
    }

    fn invocation(&self, host: &Host, task: Task) -> Invocation {
        let timeout = match task {
            Task::Playbook(_) => self.config.provision_timeout(),
            Task::Module(_) => self.config.health_check_timeout(),
        };
        Invocation::new(RunTarget::for_host(host), task)
            .with_timeout(timeout)
            .with_cancel(self.shutdown.child_token())
    }

    /// Run a playbook for a host that is already in `Provisioning`.
    ///
    /// The caller holds the host guard for the whole call.
    async fn run_playbook(
        &self,
        host: &Host,
        playbook: &str,
    ) -> std::result::Result<HostFacts, RunnerError> {
        let invocation = self.invocation(host, Task::Playbook(playbook.to_string()));
        self.runner.run(&invocation).await.map(|output| output.facts)
    }

    async fn allocate_checked(
        &self,
        host_id: &HostId,
        request: AllocationRequest,
        operation: Operation,
    ) -> Result<Allocation> {
        ledger::validate_request(&request)?;

        let _guard = self.locks.acquire(host_id).await;
        let mut host = self.load(host_id)?;
        lifecycle::ensure_allowed(&host, operation)?;

        let allocated = ledger::debit(&host, &request.resources)?;
        let now = Utc::now();
        let allocation = Allocation {
            allocation_id: AllocationId::generate(),
            host_id: *host_id,
            purpose: request.purpose,
            resources: request.resources,
            reference: request.reference,
            created_at: now,
        };
        host.allocated = allocated;
        host.updated_at = now;
        self.store.commit_allocation(&host, &allocation)?;

        info!(
            host_id = %host_id,
            allocation_id = %allocation.allocation_id,
            purpose = %allocation.purpose,
            resources = %allocation.resources,
            available = %host.available(),
            "Allocated resources"
        );
        Ok(allocation)
    }
}

/// Apply gathered facts to a host's capacity and inventory fields.
///
/// Facts that were not reported leave the existing value in place. Capacity
/// below what is already allocated is rejected.
fn apply_facts(host: &mut Host, facts: &HostFacts) -> std::result::Result<(), OperationFailure> {
    let mut total = host.total;
    if let Some(cores) = facts.cpu_cores {
        total.cpu_millicores = cores.saturating_mul(1000);
    }
    if let Some(memory_mb) = facts.memory_mb {
        total.memory_mb = memory_mb;
    }
    if let Some(disk_gb) = facts.disk_gb {
        total.disk_gb = disk_gb;
    }

    if let Some(shortfall) = total.shortfall(&host.allocated) {
        return Err(OperationFailure::below_allocation(shortfall));
    }

    host.total = total;
    if let Some(distribution) = &facts.distribution {
        host.os_info = Some(distribution.clone());
    }
    Ok(())
}

fn validate_registration(request: &RegisterHostRequest) -> Result<(String, IpAddr)> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ControlError::Validation(
            "host name must not be empty".to_string(),
        ));
    }
    let ip: IpAddr = request.ip.trim().parse().map_err(|_| {
        ControlError::Validation(format!("{:?} is not a valid IP address", request.ip))
    })?;
    if request.ssh_user.trim().is_empty() {
        return Err(ControlError::Validation(
            "ssh user must not be empty".to_string(),
        ));
    }
    if request.ssh_port == 0 {
        return Err(ControlError::Validation(
            "ssh port must be non-zero".to_string(),
        ));
    }
    if let SshAuth::KeyFile { path } = &request.auth {
        if path.as_os_str().is_empty() {
            return Err(ControlError::Validation(
                "key authentication requires a key path".to_string(),
            ));
        }
    }
    if request.region.as_deref().is_some_and(|r| r.trim().is_empty()) {
        return Err(ControlError::Validation(
            "region must not be blank".to_string(),
        ));
    }
    Ok((name.to_string(), ip))
}

#[async_trait]
impl<S: Store + 'static, R: Runner + 'static> HostControl for HostControlService<S, R> {
    // =========================================================================
    // Inventory
    // =========================================================================

    async fn register_host(&self, request: RegisterHostRequest) -> Result<Host> {
        let (name, ip) = validate_registration(&request)?;
        let ip = ip.to_string();

        let _registration = self.locks.registration().await;
        if self.store.find_host_by_ip(&ip)?.is_some() {
            return Err(ControlError::Validation(format!(
                "a host with address {ip} is already registered"
            )));
        }
        if self.store.find_host_by_name(&name)?.is_some() {
            return Err(ControlError::Validation(format!(
                "a host named {name} is already registered"
            )));
        }

        let now = Utc::now();
        let host = Host {
            host_id: HostId::generate(&name, &ip),
            name,
            ip,
            ssh_user: request.ssh_user.trim().to_string(),
            ssh_port: request.ssh_port,
            auth: request.auth,
            status: HostState::Unprovisioned,
            region: request.region.map(|r| r.trim().to_string()),
            total: request.total.unwrap_or_default(),
            allocated: Resources::ZERO,
            is_vm_host: false,
            health: HealthStatus::Unknown,
            last_health_check: None,
            health_error: None,
            os_info: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        self.store.put_host(&host)?;

        info!(host_id = %host.host_id, name = %host.name, ip = %host.ip, "Registered host");
        Ok(host)
    }

    async fn get_host(&self, host_id: &HostId) -> Result<Host> {
        self.load(host_id)
    }

    async fn list_hosts(&self, status: Option<HostState>) -> Result<Vec<Host>> {
        let mut hosts = match status {
            Some(status) => self.store.list_hosts_by_status(status)?,
            None => self.store.list_hosts()?,
        };
        hosts.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(count = hosts.len(), "Listed hosts");
        Ok(hosts)
    }

    async fn update_capacity(&self, host_id: &HostId, total: Resources) -> Result<Host> {
        let _guard = self.locks.acquire(host_id).await;
        let mut host = self.load(host_id)?;

        if let Some(shortfall) = total.shortfall(&host.allocated) {
            return Err(ControlError::Validation(format!(
                "{} capacity {} is below the {} already allocated",
                shortfall.dimension, shortfall.available, shortfall.requested
            )));
        }

        host.total = total;
        host.updated_at = Utc::now();
        self.store.put_host(&host)?;

        info!(host_id = %host_id, total = %total, "Updated host capacity");
        Ok(host)
    }

    async fn delete_host(&self, host_id: &HostId) -> Result<()> {
        let guard = self.locks.acquire(host_id).await;
        let host = self.load(host_id)?;

        let allocations = self.store.list_allocations_by_host(host_id)?;
        if !allocations.is_empty() {
            return Err(ControlError::StateConflict {
                host_id: *host_id,
                state: host.status,
                operation: Operation::Delete,
                reason: format!("host has {} active allocations", allocations.len()),
            });
        }

        self.store.delete_host(host_id)?;
        self.locks.forget(&guard);

        info!(host_id = %host_id, name = %host.name, "Deleted host");
        Ok(())
    }

    async fn delete_host_cascade(&self, host_id: &HostId) -> Result<usize> {
        let guard = self.locks.acquire(host_id).await;
        let host = self.load(host_id)?;

        let removed = self.store.delete_host(host_id)?;
        self.locks.forget(&guard);

        warn!(
            host_id = %host_id,
            name = %host.name,
            removed_allocations = removed,
            "Deleted host with its allocations"
        );
        Ok(removed)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    async fn provision(&self, host_id: &HostId) -> Result<OperationResult> {
        let _guard = self.locks.acquire(host_id).await;
        let mut host = self.load(host_id)?;
        lifecycle::ensure_allowed(&host, Operation::Provision)?;

        self.transition(&mut host, HostState::Provisioning, None)?;

        let facts = match self
            .run_playbook(&host, &self.config.provision_playbook)
            .await
        {
            Ok(facts) => facts,
            Err(e) => {
                warn!(host_id = %host_id, error = %e, "Provisioning failed");
                return self.fail_run(&mut host, e.into());
            }
        };

        if facts.is_empty() {
            debug!(host_id = %host_id, "Runner reported no facts, keeping recorded capacity");
        }
        if let Err(failure) = apply_facts(&mut host, &facts) {
            warn!(host_id = %host_id, detail = %failure, "Rejected provisioning facts");
            return self.fail_run(&mut host, failure);
        }

        self.complete_run(&mut host)?;
        info!(
            host_id = %host_id,
            total = %host.total,
            os = host.os_info.as_deref().unwrap_or("unknown"),
            "Host provisioned"
        );
        Ok(OperationResult::success("host provisioned", host))
    }

    async fn setup_vm_host(&self, host_id: &HostId) -> Result<OperationResult> {
        let _guard = self.locks.acquire(host_id).await;
        let mut host = self.load(host_id)?;
        lifecycle::ensure_allowed(&host, Operation::SetupVmHost)?;

        self.transition(&mut host, HostState::Provisioning, None)?;

        if let Err(e) = self.run_playbook(&host, &self.config.vm_host_playbook).await {
            warn!(host_id = %host_id, error = %e, "VM host setup failed");
            return self.fail_run(&mut host, e.into());
        }

        host.is_vm_host = true;
        self.complete_run(&mut host)?;
        info!(host_id = %host_id, "Host set up as VM host");
        Ok(OperationResult::success("host set up as vm host", host))
    }

    async fn set_maintenance(&self, host_id: &HostId, enabled: bool) -> Result<Host> {
        let _guard = self.locks.acquire(host_id).await;
        let mut host = self.load(host_id)?;

        let in_maintenance = host.status == HostState::Maintenance;
        match (enabled, in_maintenance) {
            (true, false) => self.transition(&mut host, HostState::Maintenance, None)?,
            (false, true) => self.transition(&mut host, HostState::Active, None)?,
            _ => debug!(host_id = %host_id, state = %host.status, "Maintenance unchanged"),
        }
        Ok(host)
    }

    async fn check_health(&self, host_id: &HostId) -> Result<OperationResult> {
        let host = self.load(host_id)?;
        let invocation = self.invocation(&host, Task::Module(self.config.health_module.clone()));

        // The probe runs unlocked; only the write below takes the guard.
        let outcome = self.runner.run(&invocation).await;

        let _guard = self.locks.acquire(host_id).await;
        let mut host = self.load(host_id)?;
        let now = Utc::now();
        host.last_health_check = Some(now);
        host.updated_at = now;

        let result = match outcome {
            Ok(_) => {
                host.health = HealthStatus::Healthy;
                host.health_error = None;
                debug!(host_id = %host_id, "Health probe succeeded");
                OperationResult::success("host is reachable", host.clone())
            }
            Err(e) => {
                let detail = e.to_string();
                host.health = HealthStatus::Unhealthy;
                host.health_error = Some(detail.clone());
                warn!(host_id = %host_id, error = %detail, "Health probe failed");
                OperationResult::failed(e.into(), host.clone())
            }
        };
        self.store.put_host(&host)?;
        Ok(result)
    }

    async fn recover_interrupted(&self) -> Result<Vec<HostId>> {
        let stuck = self.store.list_hosts_by_status(HostState::Provisioning)?;

        let mut recovered = Vec::new();
        for candidate in stuck {
            let _guard = self.locks.acquire(&candidate.host_id).await;
            let Some(mut host) = self.store.get_host(&candidate.host_id)? else {
                continue;
            };
            if host.status != HostState::Provisioning {
                continue;
            }
            self.transition(&mut host, HostState::Error, Some(INTERRUPTED_MESSAGE.to_string()))?;
            warn!(host_id = %host.host_id, name = %host.name, "Recovered interrupted provisioning");
            recovered.push(host.host_id);
        }
        Ok(recovered)
    }

    // =========================================================================
    // Ledger
    // =========================================================================

    async fn allocate(&self, host_id: &HostId, request: AllocationRequest) -> Result<Allocation> {
        self.allocate_checked(host_id, request, Operation::Allocate)
            .await
    }

    async fn allocate_vm(
        &self,
        host_id: &HostId,
        vm_name: &str,
        resources: Resources,
    ) -> Result<Allocation> {
        if vm_name.trim().is_empty() {
            return Err(ControlError::Validation(
                "vm name must not be empty".to_string(),
            ));
        }
        let request = AllocationRequest::new("vm", resources)
            .with_reference(Reference::new("virtual_machine", vm_name));
        self.allocate_checked(host_id, request, Operation::AllocateVm)
            .await
    }

    async fn deallocate(&self, allocation_id: &AllocationId) -> Result<Allocation> {
        let not_found = || ControlError::AllocationNotFound(*allocation_id);

        let located = self.store.get_allocation(allocation_id)?.ok_or_else(not_found)?;
        let _guard = self.locks.acquire(&located.host_id).await;

        // A concurrent release may have won the race for the guard.
        let allocation = self.store.get_allocation(allocation_id)?.ok_or_else(not_found)?;
        let mut host = self.load(&allocation.host_id)?;

        host.allocated = ledger::credit(&host, &allocation);
        host.updated_at = Utc::now();
        match self.store.commit_deallocation(&host, allocation_id) {
            Ok(()) => {}
            Err(StoreError::NotFound) => return Err(not_found()),
            Err(e) => return Err(e.into()),
        }

        info!(
            host_id = %host.host_id,
            allocation_id = %allocation_id,
            released = %allocation.resources,
            available = %host.available(),
            "Released allocation"
        );
        Ok(allocation)
    }

    async fn get_usage(&self, host_id: &HostId) -> Result<UsageSummary> {
        let host = self.load(host_id)?;
        Ok(UsageSummary::for_host(&host))
    }

    async fn list_allocations(&self, host_id: &HostId) -> Result<Vec<Allocation>> {
        self.load(host_id)?;
        Ok(self.store.list_allocations_by_host(host_id)?)
    }

    async fn host_details(&self, host_id: &HostId) -> Result<HostDetails> {
        let host = self.load(host_id)?;
        let allocations = self.store.list_allocations_by_host(host_id)?;
        Ok(HostDetails {
            available: host.available(),
            usage: UsageSummary::for_host(&host),
            allocations,
            host,
        })
    }

    async fn reconcile(&self, host_id: &HostId) -> Result<ReconcileOutcome> {
        let _guard = self.locks.acquire(host_id).await;
        let mut host = self.load(host_id)?;

        let allocations = self.store.list_allocations_by_host(host_id)?;
        let outcome = ReconcileOutcome {
            host_id: *host_id,
            recorded: host.allocated,
            actual: ledger::total_reserved(&allocations),
        };

        if outcome.drifted() {
            host.allocated = outcome.actual;
            host.updated_at = Utc::now();
            self.store.put_host(&host)?;
            warn!(
                host_id = %host_id,
                recorded = %outcome.recorded,
                actual = %outcome.actual,
                "Corrected allocated counters"
            );
        } else {
            debug!(host_id = %host_id, "Allocated counters consistent");
        }
        Ok(outcome)
    }

    // =========================================================================
    // Reporting
    // =========================================================================

    async fn utilization_report(&self, filter: &ReportFilter) -> Result<Vec<UtilizationRow>> {
        report::utilization_report(self.store.as_ref(), filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostfleet_core::Dimension;
    use hostfleet_provision::{MockRunner, RunOutput};
    use hostfleet_store::RocksStore;
    use std::path::PathBuf;
    use tempfile::TempDir;

    type Service = HostControlService<RocksStore, MockRunner>;

    fn setup() -> (Service, Arc<MockRunner>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let runner = Arc::new(MockRunner::new());
        let service = HostControlService::with_defaults(store, Arc::clone(&runner));
        (service, runner, dir)
    }

    fn facts(cores: u64, memory_mb: u64, disk_gb: u64) -> HostFacts {
        HostFacts {
            cpu_cores: Some(cores),
            memory_mb: Some(memory_mb),
            disk_gb: Some(disk_gb),
            distribution: Some("Ubuntu 22.04".to_string()),
        }
    }

    async fn active_host(service: &Service, runner: &MockRunner, name: &str, ip: &str) -> Host {
        let host = service
            .register_host(RegisterHostRequest::new(name, ip))
            .await
            .unwrap();
        runner.push_facts(facts(8, 16384, 500));
        let result = service.provision(&host.host_id).await.unwrap();
        assert!(result.is_success());
        result.host
    }

    #[tokio::test]
    async fn register_validates_input() {
        let (service, _runner, _dir) = setup();

        let cases = [
            RegisterHostRequest::new("  ", "10.0.0.1"),
            RegisterHostRequest::new("node-1", "not-an-ip"),
            RegisterHostRequest::new("node-1", "10.0.0.1").with_ssh("root", 0, SshAuth::Agent),
            RegisterHostRequest::new("node-1", "10.0.0.1").with_ssh(
                "root",
                22,
                SshAuth::KeyFile {
                    path: PathBuf::new(),
                },
            ),
        ];
        for request in cases {
            let err = service.register_host(request).await.unwrap_err();
            assert!(matches!(err, ControlError::Validation(_)), "{err}");
        }
        assert!(service.list_hosts(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn register_rejects_duplicates() {
        let (service, _runner, _dir) = setup();
        let host = service
            .register_host(
                RegisterHostRequest::new("node-1", "10.0.0.1")
                    .with_capacity(Resources::from_cores(4, 8192, 100)),
            )
            .await
            .unwrap();
        assert_eq!(host.status, HostState::Unprovisioned);
        assert_eq!(host.total, Resources::from_cores(4, 8192, 100));

        let same_ip = service
            .register_host(RegisterHostRequest::new("node-2", "10.0.0.1"))
            .await;
        assert!(matches!(same_ip, Err(ControlError::Validation(_))));

        let same_name = service
            .register_host(RegisterHostRequest::new("NODE-1", "10.0.0.2"))
            .await;
        assert!(matches!(same_name, Err(ControlError::Validation(_))));
    }

    #[tokio::test]
    async fn provision_success_populates_capacity() {
        let (service, runner, _dir) = setup();
        let host = active_host(&service, &runner, "node-1", "10.0.0.1").await;

        assert_eq!(host.status, HostState::Active);
        assert_eq!(host.total, Resources::from_cores(8, 16384, 500));
        assert_eq!(host.os_info.as_deref(), Some("Ubuntu 22.04"));
        assert!(host.error_message.is_none());

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].task,
            Task::Playbook("provision_bare_metal_host.yml".to_string())
        );
        assert_eq!(calls[0].variables["host_ip"], "10.0.0.1");
    }

    #[tokio::test]
    async fn provision_failure_records_error() {
        let (service, runner, _dir) = setup();
        let host = service
            .register_host(RegisterHostRequest::new("node-1", "10.0.0.1"))
            .await
            .unwrap();

        runner.push_failure("unreachable");
        let result = service.provision(&host.host_id).await.unwrap();

        assert!(!result.is_success());
        assert_eq!(result.host.status, HostState::Error);
        assert!(matches!(
            result.runner_error(),
            Some(RunnerError::Failed { message, exit_code: Some(2) }) if message == "unreachable"
        ));
        let stored = service.get_host(&host.host_id).await.unwrap();
        assert_eq!(stored.status, HostState::Error);
        assert!(stored.error_message.unwrap().contains("unreachable"));
    }

    #[tokio::test]
    async fn provision_on_active_host_conflicts() {
        let (service, runner, _dir) = setup();
        let host = active_host(&service, &runner, "node-1", "10.0.0.1").await;

        let err = service.provision(&host.host_id).await.unwrap_err();
        assert!(matches!(
            err,
            ControlError::StateConflict {
                state: HostState::Active,
                operation: Operation::Provision,
                ..
            }
        ));
        assert_eq!(runner.call_count(), 1);
    }

    #[tokio::test]
    async fn facts_below_allocation_move_host_to_error() {
        let (service, runner, _dir) = setup();
        let host = active_host(&service, &runner, "node-1", "10.0.0.1").await;
        service
            .allocate(
                &host.host_id,
                AllocationRequest::new("bench", Resources::from_cores(6, 1024, 10)),
            )
            .await
            .unwrap();

        // Drive the host back to Error so it can be re-provisioned.
        runner.push_failure("flaky");
        service.setup_vm_host(&host.host_id).await.unwrap();

        runner.push_facts(facts(4, 16384, 500));
        let result = service.provision(&host.host_id).await.unwrap();
        assert!(!result.is_success());
        assert_eq!(result.host.status, HostState::Error);
        assert_eq!(result.host.total, Resources::from_cores(8, 16384, 500));
        assert_eq!(
            result.failure,
            Some(OperationFailure::CapacityBelowAllocation {
                dimension: Dimension::Cpu,
                reported: 4000,
                allocated: 6000,
            })
        );
    }

    #[tokio::test]
    async fn setup_vm_host_flow() {
        let (service, runner, _dir) = setup();
        let host = service
            .register_host(RegisterHostRequest::new("node-1", "10.0.0.1"))
            .await
            .unwrap();

        let err = service.setup_vm_host(&host.host_id).await.unwrap_err();
        assert!(matches!(err, ControlError::StateConflict { .. }));

        runner.push_facts(facts(8, 16384, 500));
        service.provision(&host.host_id).await.unwrap();

        let result = service.setup_vm_host(&host.host_id).await.unwrap();
        assert!(result.is_success());
        assert!(result.host.is_vm_host);
        assert_eq!(result.host.status, HostState::Active);
        assert_eq!(
            runner.calls()[1].task,
            Task::Playbook("setup_bare_metal_vm_host.yml".to_string())
        );
    }

    #[tokio::test]
    async fn maintenance_toggle() {
        let (service, runner, _dir) = setup();
        let host = active_host(&service, &runner, "node-1", "10.0.0.1").await;

        let held = service.set_maintenance(&host.host_id, true).await.unwrap();
        assert_eq!(held.status, HostState::Maintenance);

        let again = service.set_maintenance(&host.host_id, true).await.unwrap();
        assert_eq!(again.status, HostState::Maintenance);

        let err = service
            .allocate(&host.host_id, AllocationRequest::new("vm", Resources::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::StateConflict { .. }));

        let released = service.set_maintenance(&host.host_id, false).await.unwrap();
        assert_eq!(released.status, HostState::Active);

        // Leaving maintenance when not in it is a no-op.
        let unchanged = service.set_maintenance(&host.host_id, false).await.unwrap();
        assert_eq!(unchanged.status, HostState::Active);
    }

    #[tokio::test]
    async fn check_health_keeps_lifecycle_state() {
        let (service, runner, _dir) = setup();
        let host = service
            .register_host(RegisterHostRequest::new("node-1", "10.0.0.1"))
            .await
            .unwrap();

        let healthy = service.check_health(&host.host_id).await.unwrap();
        assert!(healthy.is_success());
        assert_eq!(healthy.host.health, HealthStatus::Healthy);
        assert_eq!(healthy.host.status, HostState::Unprovisioned);
        assert!(healthy.host.last_health_check.is_some());
        assert_eq!(runner.calls()[0].task, Task::Module("ping".to_string()));

        runner.push_outcome(Err(RunnerError::TimedOut { seconds: 30 }));
        let unhealthy = service.check_health(&host.host_id).await.unwrap();
        assert!(!unhealthy.is_success());
        assert_eq!(unhealthy.host.health, HealthStatus::Unhealthy);
        assert_eq!(unhealthy.host.status, HostState::Unprovisioned);
        assert_eq!(
            unhealthy.runner_error(),
            Some(&RunnerError::TimedOut { seconds: 30 })
        );
        assert!(unhealthy.host.health_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn allocate_and_deallocate_example() {
        let (service, runner, _dir) = setup();
        let host = active_host(&service, &runner, "node-1", "10.0.0.1").await;

        let allocation = service
            .allocate(
                &host.host_id,
                AllocationRequest::new("vm", Resources::from_cores(2, 4096, 50)),
            )
            .await
            .unwrap();

        let after = service.get_host(&host.host_id).await.unwrap();
        assert_eq!(after.available(), Resources::from_cores(6, 12288, 450));

        let usage = service.get_usage(&host.host_id).await.unwrap();
        assert!((usage.cpu_percent - 25.0).abs() < 1e-9);

        service.deallocate(&allocation.allocation_id).await.unwrap();
        let restored = service.get_host(&host.host_id).await.unwrap();
        assert_eq!(restored.available(), restored.total);
        assert!(restored.allocated.is_zero());

        let err = service
            .deallocate(&allocation.allocation_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::AllocationNotFound(_)));
        let unchanged = service.get_host(&host.host_id).await.unwrap();
        assert!(unchanged.allocated.is_zero());
    }

    #[tokio::test]
    async fn over_allocation_leaves_availability_unchanged() {
        let (service, runner, _dir) = setup();
        let host = active_host(&service, &runner, "node-1", "10.0.0.1").await;

        let err = service
            .allocate(
                &host.host_id,
                AllocationRequest::new("vm", Resources::from_cores(1, 16385, 1)),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::InsufficientCapacity {
                dimension: hostfleet_core::Dimension::Memory,
                requested: 16385,
                available: 16384,
                ..
            }
        ));

        let after = service.get_host(&host.host_id).await.unwrap();
        assert!(after.allocated.is_zero());
        assert!(service
            .list_allocations(&host.host_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn allocate_vm_requires_vm_host() {
        let (service, runner, _dir) = setup();
        let host = active_host(&service, &runner, "node-1", "10.0.0.1").await;
        let request = Resources::from_cores(2, 2048, 20);

        let err = service
            .allocate_vm(&host.host_id, "vm-1", request)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::StateConflict {
                operation: Operation::AllocateVm,
                ..
            }
        ));

        service.setup_vm_host(&host.host_id).await.unwrap();
        let allocation = service
            .allocate_vm(&host.host_id, "vm-1", request)
            .await
            .unwrap();
        assert_eq!(allocation.purpose, "vm");
        assert_eq!(
            allocation.reference,
            Some(Reference::new("virtual_machine", "vm-1"))
        );
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let (service, _runner, _dir) = setup();
        let host_id = HostId::from_bytes([0xab; 32]);

        assert!(matches!(
            service.provision(&host_id).await,
            Err(ControlError::HostNotFound(_))
        ));
        assert!(matches!(
            service.get_usage(&host_id).await,
            Err(ControlError::HostNotFound(_))
        ));
        assert!(matches!(
            service
                .allocate(&host_id, AllocationRequest::new("vm", Resources::ZERO))
                .await,
            Err(ControlError::HostNotFound(_))
        ));
        assert!(matches!(
            service.deallocate(&AllocationId::generate()).await,
            Err(ControlError::AllocationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_blocked_while_allocated() {
        let (service, runner, _dir) = setup();
        let host = active_host(&service, &runner, "node-1", "10.0.0.1").await;
        let allocation = service
            .allocate(
                &host.host_id,
                AllocationRequest::new("bench", Resources::from_cores(1, 1024, 10)),
            )
            .await
            .unwrap();

        let err = service.delete_host(&host.host_id).await.unwrap_err();
        assert!(matches!(
            err,
            ControlError::StateConflict {
                operation: Operation::Delete,
                ..
            }
        ));

        service.deallocate(&allocation.allocation_id).await.unwrap();
        service.delete_host(&host.host_id).await.unwrap();
        assert!(matches!(
            service.get_host(&host.host_id).await,
            Err(ControlError::HostNotFound(_))
        ));
    }

    #[tokio::test]
    async fn cascade_delete_removes_allocations() {
        let (service, runner, _dir) = setup();
        let host = active_host(&service, &runner, "node-1", "10.0.0.1").await;
        let mut ids = Vec::new();
        for _ in 0..2 {
            let allocation = service
                .allocate(
                    &host.host_id,
                    AllocationRequest::new("bench", Resources::from_cores(1, 1024, 10)),
                )
                .await
                .unwrap();
            ids.push(allocation.allocation_id);
        }

        assert_eq!(service.delete_host_cascade(&host.host_id).await.unwrap(), 2);
        for id in ids {
            assert!(matches!(
                service.deallocate(&id).await,
                Err(ControlError::AllocationNotFound(_))
            ));
        }

        // The address is free again.
        service
            .register_host(RegisterHostRequest::new("node-1", "10.0.0.1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn update_capacity_respects_allocations() {
        let (service, runner, _dir) = setup();
        let host = active_host(&service, &runner, "node-1", "10.0.0.1").await;
        service
            .allocate(
                &host.host_id,
                AllocationRequest::new("bench", Resources::from_cores(4, 4096, 100)),
            )
            .await
            .unwrap();

        let err = service
            .update_capacity(&host.host_id, Resources::from_cores(2, 16384, 500))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Validation(_)));

        let updated = service
            .update_capacity(&host.host_id, Resources::from_cores(4, 8192, 200))
            .await
            .unwrap();
        assert_eq!(updated.available(), Resources::from_cores(0, 4096, 100));
    }

    #[tokio::test]
    async fn reconcile_repairs_drift() {
        let (service, runner, _dir) = setup();
        let host = active_host(&service, &runner, "node-1", "10.0.0.1").await;
        service
            .allocate(
                &host.host_id,
                AllocationRequest::new("bench", Resources::from_cores(2, 2048, 20)),
            )
            .await
            .unwrap();

        let clean = service.reconcile(&host.host_id).await.unwrap();
        assert!(!clean.drifted());

        let mut corrupted = service.get_host(&host.host_id).await.unwrap();
        corrupted.allocated = Resources::from_cores(5, 2048, 20);
        service.store().put_host(&corrupted).unwrap();

        let outcome = service.reconcile(&host.host_id).await.unwrap();
        assert!(outcome.drifted());
        assert_eq!(outcome.actual, Resources::from_cores(2, 2048, 20));
        let repaired = service.get_host(&host.host_id).await.unwrap();
        assert_eq!(repaired.allocated, Resources::from_cores(2, 2048, 20));
    }

    #[tokio::test]
    async fn recover_interrupted_moves_to_error() {
        let (service, _runner, _dir) = setup();
        let host = service
            .register_host(RegisterHostRequest::new("node-1", "10.0.0.1"))
            .await
            .unwrap();
        service
            .store()
            .update_host_status(&host.host_id, HostState::Provisioning, None)
            .unwrap();

        let recovered = service.recover_interrupted().await.unwrap();
        assert_eq!(recovered, vec![host.host_id]);

        let stored = service.get_host(&host.host_id).await.unwrap();
        assert_eq!(stored.status, HostState::Error);
        assert_eq!(stored.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
        assert!(service.recover_interrupted().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn host_details_and_report() {
        let (service, runner, _dir) = setup();
        let host = active_host(&service, &runner, "node-1", "10.0.0.1").await;
        service
            .allocate(
                &host.host_id,
                AllocationRequest::new("bench", Resources::from_cores(4, 8192, 250)),
            )
            .await
            .unwrap();

        let details = service.host_details(&host.host_id).await.unwrap();
        assert_eq!(details.allocations.len(), 1);
        assert_eq!(details.available, Resources::from_cores(4, 8192, 250));
        assert!((details.usage.disk_percent - 50.0).abs() < 1e-9);

        let report = service
            .utilization_report(&ReportFilter::default())
            .await
            .unwrap();
        assert_eq!(report.len(), 1);
        assert!((report[0].allocated_cpu - 4.0).abs() < 1e-9);
        assert!((report[0].memory_percent - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn gateway_success_without_facts_keeps_capacity() {
        let (service, runner, _dir) = setup();
        let host = service
            .register_host(
                RegisterHostRequest::new("node-1", "10.0.0.1")
                    .with_capacity(Resources::from_cores(2, 2048, 40)),
            )
            .await
            .unwrap();

        runner.push_outcome(Ok(RunOutput::default()));
        let result = service.provision(&host.host_id).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.host.total, Resources::from_cores(2, 2048, 40));
    }

    /// Store that refuses to persist hosts in one state.
    struct RejectingStore {
        inner: RocksStore,
        reject: HostState,
    }

    impl Store for RejectingStore {
        fn put_host(&self, host: &Host) -> hostfleet_store::Result<()> {
            if host.status == self.reject {
                return Err(StoreError::Database("write rejected".to_string()));
            }
            self.inner.put_host(host)
        }
        fn get_host(&self, host_id: &HostId) -> hostfleet_store::Result<Option<Host>> {
            self.inner.get_host(host_id)
        }
        fn find_host_by_ip(&self, ip: &str) -> hostfleet_store::Result<Option<Host>> {
            self.inner.find_host_by_ip(ip)
        }
        fn find_host_by_name(&self, name: &str) -> hostfleet_store::Result<Option<Host>> {
            self.inner.find_host_by_name(name)
        }
        fn list_hosts(&self) -> hostfleet_store::Result<Vec<Host>> {
            self.inner.list_hosts()
        }
        fn list_hosts_by_status(&self, status: HostState) -> hostfleet_store::Result<Vec<Host>> {
            self.inner.list_hosts_by_status(status)
        }
        fn update_host_status(
            &self,
            host_id: &HostId,
            status: HostState,
            error_message: Option<String>,
        ) -> hostfleet_store::Result<Host> {
            self.inner.update_host_status(host_id, status, error_message)
        }
        fn delete_host(&self, host_id: &HostId) -> hostfleet_store::Result<usize> {
            self.inner.delete_host(host_id)
        }
        fn get_allocation(
            &self,
            allocation_id: &AllocationId,
        ) -> hostfleet_store::Result<Option<Allocation>> {
            self.inner.get_allocation(allocation_id)
        }
        fn list_allocations_by_host(
            &self,
            host_id: &HostId,
        ) -> hostfleet_store::Result<Vec<Allocation>> {
            self.inner.list_allocations_by_host(host_id)
        }
        fn commit_allocation(
            &self,
            host: &Host,
            allocation: &Allocation,
        ) -> hostfleet_store::Result<()> {
            self.inner.commit_allocation(host, allocation)
        }
        fn commit_deallocation(
            &self,
            host: &Host,
            allocation_id: &AllocationId,
        ) -> hostfleet_store::Result<()> {
            self.inner.commit_deallocation(host, allocation_id)
        }
    }

    fn rejecting_setup(
        reject: HostState,
    ) -> (HostControlService<RejectingStore, MockRunner>, Arc<MockRunner>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RejectingStore {
            inner: RocksStore::open(dir.path()).unwrap(),
            reject,
        });
        let runner = Arc::new(MockRunner::new());
        let service = HostControlService::with_defaults(store, Arc::clone(&runner));
        (service, runner, dir)
    }

    #[tokio::test]
    async fn unrecorded_success_leaves_host_in_error() {
        let (service, runner, _dir) = rejecting_setup(HostState::Active);
        let host = service
            .register_host(RegisterHostRequest::new("node-1", "10.0.0.1"))
            .await
            .unwrap();

        runner.push_facts(facts(8, 16384, 500));
        let err = service.provision(&host.host_id).await.unwrap_err();
        assert!(matches!(err, ControlError::Store(_)), "{err}");

        let stored = service.get_host(&host.host_id).await.unwrap();
        assert_eq!(stored.status, HostState::Error);
        assert!(stored
            .error_message
            .unwrap()
            .contains("result was not recorded"));
        assert_eq!(stored.total, Resources::ZERO);
    }

    #[tokio::test]
    async fn unrecorded_failure_still_leaves_host_in_error() {
        let (service, runner, _dir) = rejecting_setup(HostState::Error);
        let host = service
            .register_host(RegisterHostRequest::new("node-1", "10.0.0.1"))
            .await
            .unwrap();

        runner.push_failure("unreachable");
        assert!(service.provision(&host.host_id).await.is_err());

        let stored = service.get_host(&host.host_id).await.unwrap();
        assert_eq!(stored.status, HostState::Error);
        assert!(stored.error_message.unwrap().contains("unreachable"));
    }
}
