//! Instance commands: run, ps, query and halt.

use std::fmt::Write;

use crate::{
    cli::AnsiStyles,
    config::Context,
    instance::{CloudConfig, InstanceRecord, Registry},
    vm::{Halter, LaunchRequest, Orchestrator, SharedDir},
    CorectlError, CorectlResult,
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Boots an instance. Needs root, as the hypervisor does.
pub async fn run(ctx: &Context, request: &LaunchRequest) -> CorectlResult<InstanceRecord> {
    if !ctx.get_privileged() {
        return Err(CorectlError::NotPrivileged("boot instances".to_string()));
    }
    ctx.ensure_dirs().await?;
    SharedDir::from_context(ctx).share().await?;

    let record = Orchestrator::new(ctx)?.launch(request).await?;
    if *record.get_detached() {
        let address = record
            .get_public_ip()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("started `{}` in background with IP {address}", record.get_name());
    }
    Ok(record)
}

/// Prints every live instance, after a summary of the resources they use.
pub async fn ps(ctx: &Context, all: bool, json: bool) -> CorectlResult<()> {
    let records = Registry::from_context(ctx).enumerate().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    println!("{}", summary(&records));
    for record in &records {
        print!("{}", describe(record, all));
    }
    Ok(())
}

/// Prints the selected live instances, or all of them when no ids are given.
///
/// By default only names are printed, `all` prints a table and `json` the full records.
pub async fn query(ctx: &Context, ids: &[String], all: bool, json: bool) -> CorectlResult<()> {
    let records = select(&Registry::from_context(ctx), ids).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else if all {
        print!("{}", table(&records));
    } else {
        for record in &records {
            println!("{}", record.get_name());
        }
    }
    Ok(())
}

/// Halts the selected instances, or all of them.
///
/// Every instance is attempted. The first failure is returned once all were.
pub async fn halt(ctx: &Context, ids: &[String], all: bool) -> CorectlResult<()> {
    let registry = Registry::from_context(ctx);
    let records = if all {
        registry.enumerate().await?
    } else {
        select(&registry, ids).await?
    };

    if records.is_empty() {
        tracing::info!("nothing to halt");
        return Ok(());
    }

    let halter = Halter::new(ctx, &registry);
    let mut first_error = None;
    for record in &records {
        if let Err(e) = halter.halt(record).await {
            tracing::error!("unable to halt `{}`: {e}", record.get_name());
            first_error.get_or_insert(e);
        }
    }

    release_share(ctx, &registry).await;

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Stops sharing the host's home directories once no instance is left to use them.
async fn release_share(ctx: &Context, registry: &Registry) {
    match registry.enumerate().await {
        Ok(live) if live.is_empty() => {}
        _ => return,
    }
    if !ctx.get_privileged() {
        tracing::debug!("not privileged, leaving the NFS exports as they are");
        return;
    }

    if let Err(e) = SharedDir::from_context(ctx).unshare().await {
        tracing::warn!("unable to stop sharing {}: {e}", ctx.get_shared_dir().display());
    }
}

async fn select(registry: &Registry, ids: &[String]) -> CorectlResult<Vec<InstanceRecord>> {
    if ids.is_empty() {
        return registry.enumerate().await;
    }

    let mut records = Vec::with_capacity(ids.len());
    for id in ids {
        records.push(registry.find(id).await?);
    }
    Ok(records)
}

fn summary(records: &[InstanceRecord]) -> String {
    let cpus: u32 = records.iter().map(|record| u32::from(*record.get_cpus())).sum();
    let memory: u32 = records.iter().map(|record| *record.get_memory()).sum();
    format!(
        "found {} running VMs, summing {cpus} vCPUs and {memory}MB",
        records.len()
    )
}

fn describe(record: &InstanceRecord, all: bool) -> String {
    let mut out = String::new();
    let ip = record
        .get_public_ip()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "-".to_string());
    let pid = record
        .get_pid()
        .map(|pid| pid.to_string())
        .unwrap_or_else(|| "pending".to_string());
    let uptime = record.age().num_seconds().max(0);

    let _ = writeln!(out, "{}", format!("UUID: {}", record.get_uuid()).header());
    let _ = writeln!(out, "  Name:      {}", record.get_name());
    let _ = writeln!(out, "  Image:     {}/{}", record.get_channel(), record.get_version());
    let _ = writeln!(out, "  vCPUs:     {}", record.get_cpus());
    let _ = writeln!(out, "  RAM:       {}MB", record.get_memory());
    let _ = writeln!(out, "  Created:   {} ({uptime}s ago)", record.get_created_at().to_rfc3339());
    let _ = writeln!(out, "  PID:       {pid}");
    let _ = writeln!(out, "  Detached:  {}", record.get_detached());
    let _ = writeln!(out, "  IP:        {ip}");

    if !all {
        return out;
    }

    let _ = writeln!(out, "  MAC:       {}", record.get_mac());
    for (index, interface) in record.get_interfaces().iter().enumerate() {
        match &interface.path {
            Some(path) => {
                let _ = writeln!(out, "  eth{index}:      tap {}", path.display());
            }
            None => {
                let _ = writeln!(out, "  eth{index}:      raw");
            }
        }
    }
    for device in record.get_storage().devices() {
        let root = if record.get_storage().hard_drives.first() == Some(device)
            && record.get_root().is_some()
        {
            " (root)"
        } else {
            ""
        };
        let _ = writeln!(
            out,
            "  {:<10} {}{root}",
            format!("{}:", device.guest_device()),
            device.path.display()
        );
    }
    match record.get_cloud_config() {
        Some(CloudConfig::Local(path)) => {
            let _ = writeln!(out, "  Cloud-config: {} (local)", path.display());
        }
        Some(CloudConfig::Remote(url)) => {
            let _ = writeln!(out, "  Cloud-config: {url} (remote)");
        }
        None => {}
    }
    if let Some(extra) = record.get_extra() {
        let _ = writeln!(out, "  Extra:     {extra}");
    }
    out
}

fn table(records: &[InstanceRecord]) -> String {
    let mut out = String::new();
    let header = format!(
        "{:<20} {:<36} {:<8} {:<12} {:<15} {:<8}",
        "NAME", "UUID", "CHANNEL", "VERSION", "IP", "PID"
    );
    let _ = writeln!(out, "{}", header.header());

    for record in records {
        let ip = record
            .get_public_ip()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "-".to_string());
        let pid = record
            .get_pid()
            .map(|pid| pid.to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:<20} {:<36} {:<8} {:<12} {:<15} {:<8}",
            record.get_name(),
            record.get_uuid(),
            record.get_channel().to_string(),
            record.get_version().to_string(),
            ip,
            pid
        );
    }
    out
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
