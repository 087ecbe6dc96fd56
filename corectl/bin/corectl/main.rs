mod handlers;

use clap::{CommandFactory, Parser};
use corectl::{
    cli::{CorectlArgs, CorectlSubcommand},
    config::Context,
    management::{image, instance},
    CorectlResult,
};
use handlers::RunFlags;
use tracing_subscriber::EnvFilter;

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> CorectlResult<()> {
    // Parse command line arguments
    let args = CorectlArgs::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.debug { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // The supervisor doesn't need a context, and must not fail on one
    let subcommand = match args.subcommand {
        Some(CorectlSubcommand::Supervise {
            console_log,
            exe,
            args,
        }) => return handlers::supervise_subcommand(console_log, exe, args).await,
        subcommand => subcommand,
    };

    let ctx = Context::from_env(args.debug)?;
    match subcommand {
        Some(CorectlSubcommand::Run {
            channel,
            version,
            uuid,
            name,
            memory,
            cpus,
            cloud_config,
            sshkey,
            root,
            cdrom,
            volumes,
            taps,
            detached,
            local,
            extra,
        }) => {
            let flags = RunFlags {
                channel,
                version,
                uuid,
                name,
                memory,
                cpus,
                cloud_config,
                sshkey,
                root,
                cdrom,
                volumes,
                taps,
                detached,
                local,
                extra,
            };
            handlers::run_subcommand(&ctx, flags).await?;
        }
        Some(CorectlSubcommand::Ps { all, json }) => {
            instance::ps(&ctx, all, json).await?;
        }
        Some(CorectlSubcommand::Query { ids, all, json }) => {
            instance::query(&ctx, &ids, all, json).await?;
        }
        Some(CorectlSubcommand::Halt { ids, all }) => {
            instance::halt(&ctx, &ids, all).await?;
        }
        Some(CorectlSubcommand::Ssh { id, command }) => {
            handlers::ssh_subcommand(&ctx, id, command).await?;
        }
        Some(CorectlSubcommand::Put {
            source,
            destination,
        }) => {
            handlers::put_subcommand(&ctx, source, destination).await?;
        }
        Some(CorectlSubcommand::Pull {
            channel,
            version,
            force,
        }) => {
            image::pull(&ctx, &channel, &version, force).await?;
        }
        Some(CorectlSubcommand::Ls { channel, all, json }) => {
            image::ls(&ctx, &channel, all, json).await?;
        }
        Some(CorectlSubcommand::Rm {
            channel,
            version,
            old,
        }) => {
            image::rm(&ctx, &channel, &version, old).await?;
        }
        Some(CorectlSubcommand::Version) => {
            println!("corectl {}", env!("CARGO_PKG_VERSION"));
        }
        Some(CorectlSubcommand::Supervise { .. }) => unreachable!("handled before the context"),
        None => {
            CorectlArgs::command().print_help()?;
        }
    }

    Ok(())
}
