//! Hostfleet CLI - manage bare-metal hosts from the command line.
//!
//! This is the entry point for the `hostfleet` binary. Every command prints
//! JSON on stdout; logs go to stderr.

mod args;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use hostfleet_control::{
    AllocationId, AllocationRequest, ControlConfig, HostControl, HostControlService, HostId,
    OperationResult, Reference, RegisterHostRequest, ReportFilter, Resources,
};
use hostfleet_provision::{AnsibleRunner, RunnerConfig};
use hostfleet_store::{RocksStore, Store};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use args::{Cli, Command, HostCommand, Toggle};

type Service = HostControlService<RocksStore, AnsibleRunner>;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hostfleet=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let store = RocksStore::open(&cli.data_dir)
        .with_context(|| format!("failed to open store at {}", cli.data_dir.display()))?;
    tracing::debug!(data_dir = %cli.data_dir.display(), "Opened RocksDB store");

    let runner = AnsibleRunner::new(RunnerConfig::from_env());
    let control = HostControlService::new(
        Arc::new(store),
        Arc::new(runner),
        ControlConfig::from_env(),
    );

    let recovered = control.recover_interrupted().await?;
    if !recovered.is_empty() {
        tracing::warn!(count = recovered.len(), "Marked interrupted provisioning runs as failed");
    }

    // Ctrl-C kills any running playbook; the host is left in Error.
    let shutdown = control.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling runner");
            shutdown.cancel();
        }
    });

    run(&control, cli.command).await
}

async fn run(control: &Service, command: Command) -> anyhow::Result<ExitCode> {
    match command {
        Command::Host(command) => run_host(control, command).await,
        Command::Provision { host } => {
            let host_id = resolve_host(control, &host)?;
            operation(&control.provision(&host_id).await?)
        }
        Command::SetupVmHost { host } => {
            let host_id = resolve_host(control, &host)?;
            operation(&control.setup_vm_host(&host_id).await?)
        }
        Command::Maintenance { host, mode } => {
            let host_id = resolve_host(control, &host)?;
            let host = control
                .set_maintenance(&host_id, mode == Toggle::On)
                .await?;
            print(&host)
        }
        Command::Health { host } => {
            let host_id = resolve_host(control, &host)?;
            operation(&control.check_health(&host_id).await?)
        }
        Command::Allocate {
            host,
            purpose,
            resources,
            reference_kind,
            reference_id,
            vm,
        } => {
            let host_id = resolve_host(control, &host)?;
            let resources = Resources::from(resources);
            let allocation = if let Some(vm_name) = vm {
                control.allocate_vm(&host_id, &vm_name, resources).await?
            } else {
                let mut request =
                    AllocationRequest::new(purpose.unwrap_or_default(), resources);
                if let (Some(kind), Some(id)) = (reference_kind, reference_id) {
                    request = request.with_reference(Reference::new(kind, id));
                }
                control.allocate(&host_id, request).await?
            };
            print(&allocation)
        }
        Command::Deallocate { allocation } => {
            let allocation_id: AllocationId = allocation
                .parse()
                .with_context(|| format!("invalid allocation id {allocation:?}"))?;
            print(&control.deallocate(&allocation_id).await?)
        }
        Command::Usage { host } => {
            let host_id = resolve_host(control, &host)?;
            print(&control.get_usage(&host_id).await?)
        }
        Command::Report {
            host,
            status,
            region,
        } => {
            let host_id = host.map(|h| resolve_host(control, &h)).transpose()?;
            let filter = ReportFilter {
                host_id,
                status,
                region,
            };
            print(&control.utilization_report(&filter).await?)
        }
        Command::Reconcile { host } => {
            let host_id = resolve_host(control, &host)?;
            print(&control.reconcile(&host_id).await?)
        }
    }
}

async fn run_host(control: &Service, command: HostCommand) -> anyhow::Result<ExitCode> {
    match command {
        HostCommand::Add(add) => {
            let mut request = RegisterHostRequest::new(&add.name, &add.ip).with_ssh(
                &add.ssh_user,
                add.ssh_port,
                add.auth(),
            );
            if let Some(region) = add.region {
                request = request.with_region(region);
            }
            print(&control.register_host(request).await?)
        }
        HostCommand::List { status } => print(&control.list_hosts(status).await?),
        HostCommand::Show { host } => {
            let host_id = resolve_host(control, &host)?;
            print(&control.host_details(&host_id).await?)
        }
        HostCommand::Delete { host, cascade } => {
            let host_id = resolve_host(control, &host)?;
            let removed_allocations = if cascade {
                control.delete_host_cascade(&host_id).await?
            } else {
                control.delete_host(&host_id).await?;
                0
            };
            print(&serde_json::json!({
                "deleted": host_id,
                "removed_allocations": removed_allocations,
            }))
        }
        HostCommand::Capacity { host, resources } => {
            let host_id = resolve_host(control, &host)?;
            print(&control.update_capacity(&host_id, resources.into()).await?)
        }
    }
}

/// Accept either a hex host ID or a hostname.
fn resolve_host(control: &Service, reference: &str) -> anyhow::Result<HostId> {
    if let Ok(host_id) = HostId::from_hex(reference) {
        return Ok(host_id);
    }
    match control.store().find_host_by_name(reference)? {
        Some(host) => Ok(host.host_id),
        None => bail!("no host with id or name {reference:?}"),
    }
}

fn operation(result: &OperationResult) -> anyhow::Result<ExitCode> {
    print(result)?;
    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<ExitCode> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(ExitCode::SUCCESS)
}
