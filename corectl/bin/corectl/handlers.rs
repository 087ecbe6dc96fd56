use std::path::PathBuf;

use clap::{error::ErrorKind, CommandFactory};
use corectl::{
    cli::{AnsiStyles, CorectlArgs},
    config::Context,
    management::{instance, remote, supervise},
    vm::LaunchRequest,
    CorectlResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The flags of `corectl run`, as parsed.
pub struct RunFlags {
    pub channel: String,
    pub version: String,
    pub uuid: String,
    pub name: Option<String>,
    pub memory: u32,
    pub cpus: u8,
    pub cloud_config: Option<String>,
    pub sshkey: Option<String>,
    pub root: Option<String>,
    pub cdrom: Option<String>,
    pub volumes: Vec<String>,
    pub taps: Vec<String>,
    pub detached: bool,
    pub local: bool,
    pub extra: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

pub async fn run_subcommand(ctx: &Context, flags: RunFlags) -> CorectlResult<()> {
    if flags.cpus == 0 {
        usage_error(
            "run",
            "",
            ErrorKind::InvalidValue,
            format!("`{}` must be at least 1", "--cpus".literal()),
        );
    }

    let request = LaunchRequest {
        channel: flags.channel,
        version: flags.version,
        uuid: Some(flags.uuid),
        name: flags.name,
        memory: flags.memory,
        cpus: flags.cpus,
        cloud_config: flags.cloud_config,
        ssh_key: flags.sshkey,
        root: flags.root,
        cdrom: flags.cdrom,
        volumes: flags.volumes,
        taps: flags.taps,
        detached: flags.detached,
        prefer_local: flags.local,
        extra: flags.extra,
    };

    instance::run(ctx, &request).await?;
    Ok(())
}

pub async fn ssh_subcommand(ctx: &Context, id: String, command: Vec<String>) -> CorectlResult<()> {
    let code = remote::ssh(ctx, &id, &command).await?;
    if code != 0 {
        tracing::debug!("remote session ended with {code}");
        std::process::exit(code);
    }
    Ok(())
}

pub async fn put_subcommand(
    ctx: &Context,
    source: PathBuf,
    destination: String,
) -> CorectlResult<()> {
    if !destination.contains(':') {
        usage_error(
            "put",
            "<SOURCE> <INSTANCE:PATH>",
            ErrorKind::InvalidValue,
            format!(
                "destination `{}` should read {}",
                destination.literal(),
                "<instance>:<path>".placeholder()
            ),
        );
    }

    remote::put(ctx, &source, &destination).await
}

pub async fn supervise_subcommand(
    console_log: Option<PathBuf>,
    exe: PathBuf,
    args: Vec<String>,
) -> CorectlResult<()> {
    let code = supervise::supervise(console_log, &exe, args).await?;
    std::process::exit(code);
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn usage_error(command: &str, positional_placeholder: &str, kind: ErrorKind, message: String) {
    CorectlArgs::command()
        .override_usage(usage(command, positional_placeholder))
        .error(kind, message)
        .exit();
}

fn usage(command: &str, positional_placeholder: &str) -> String {
    format!(
        "{} {} {} {}",
        "corectl".literal(),
        command.literal(),
        "[OPTIONS]".placeholder(),
        positional_placeholder.placeholder()
    )
}
