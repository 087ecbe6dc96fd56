use std::path::PathBuf;

use clap::Parser;

use crate::{
    cli::styles,
    config::{DEFAULT_MEMORY_MIB, DEFAULT_NUM_VCPUS, LATEST_VERSION},
    image::Channel,
};

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// `corectl` runs CoreOS virtual machines on top of a lightweight hypervisor
#[derive(Debug, Parser)]
#[command(name = "corectl", author, styles=styles::styles())]
pub struct CorectlArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: Option<CorectlSubcommand>,

    /// Enable debug output
    #[arg(short, long, global = true)]
    pub debug: bool,
}

/// Available subcommands
#[derive(Debug, Parser)]
pub enum CorectlSubcommand {
    /// Boot a new CoreOS instance
    #[command(name = "run", alias = "start")]
    Run {
        /// Release channel of the image
        #[arg(short, long, default_value_t = Channel::default().to_string())]
        channel: String,

        /// Version of the image
        #[arg(short, long, default_value = LATEST_VERSION)]
        version: String,

        /// Instance UUID, `random` for a fresh one
        #[arg(short, long, default_value = "random")]
        uuid: String,

        /// Instance name, defaults to the UUID
        #[arg(short, long)]
        name: Option<String>,

        /// RAM in MB
        #[arg(short, long, default_value_t = DEFAULT_MEMORY_MIB)]
        memory: u32,

        /// Number of vCPUs
        #[arg(short = 'N', long, default_value_t = DEFAULT_NUM_VCPUS)]
        cpus: u8,

        /// Cloud-config URL or local file
        #[arg(short = 'L', long)]
        cloud_config: Option<String>,

        /// Public ssh key to authorize in the instance
        #[arg(short = 'k', long)]
        sshkey: Option<String>,

        /// Disk image holding the root filesystem
        #[arg(short, long)]
        root: Option<String>,

        /// ISO image to attach as CD-ROM
        #[arg(long)]
        cdrom: Option<String>,

        /// Disk images to attach, repeatable or comma separated
        #[arg(short = 'p', long = "volume")]
        volumes: Vec<String>,

        /// Tap devices to attach, repeatable
        #[arg(short, long = "tap")]
        taps: Vec<String>,

        /// Run in the background
        #[arg(short = 'D', long)]
        detached: bool,

        /// Prefer the newest local image over asking upstream
        #[arg(short, long)]
        local: bool,

        /// Extra arguments for the hypervisor
        #[arg(long, hide = true)]
        extra: Option<String>,
    },

    /// List running instances
    #[command(name = "ps", alias = "status")]
    Ps {
        /// Show every detail
        #[arg(short, long)]
        all: bool,

        /// Print JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Query running instances
    #[command(name = "query", alias = "q")]
    Query {
        /// Names or UUIDs of the instances, all when omitted
        ids: Vec<String>,

        /// Show every detail
        #[arg(short, long)]
        all: bool,

        /// Print JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Halt running instances
    #[command(name = "halt", visible_aliases = ["kill", "stop"])]
    Halt {
        /// Names or UUIDs of the instances
        #[arg(required_unless_present = "all")]
        ids: Vec<String>,

        /// Halt every running instance
        #[arg(short, long, conflicts_with = "ids")]
        all: bool,
    },

    /// Open a shell in a running instance, or run a command there
    #[command(name = "ssh", alias = "attach")]
    Ssh {
        /// Name or UUID of the instance
        id: String,

        /// Command to run instead of a shell
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Copy a file into a running instance
    #[command(name = "put", visible_aliases = ["copy", "cp", "scp"])]
    Put {
        /// Local file to copy
        source: PathBuf,

        /// Destination, as `<id>:<path>`
        destination: String,
    },

    /// Download a CoreOS image
    #[command(name = "pull", visible_aliases = ["get", "fetch"])]
    Pull {
        /// Release channel of the image
        #[arg(short, long, default_value_t = Channel::default().to_string())]
        channel: String,

        /// Version of the image
        #[arg(short, long, default_value = LATEST_VERSION)]
        version: String,

        /// Download again even if present
        #[arg(short, long)]
        force: bool,
    },

    /// List local images
    #[command(name = "ls", alias = "list")]
    Ls {
        /// Release channel to list
        #[arg(short, long, default_value_t = Channel::default().to_string())]
        channel: String,

        /// List every channel
        #[arg(short, long)]
        all: bool,

        /// Print JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Remove local images
    #[command(name = "rm", alias = "rmi")]
    Rm {
        /// Release channel of the image
        #[arg(short, long, default_value_t = Channel::default().to_string())]
        channel: String,

        /// Version of the image, `latest` for the newest local one
        #[arg(short, long, default_value = LATEST_VERSION)]
        version: String,

        /// Remove every version but the newest
        #[arg(short, long, conflicts_with = "version")]
        old: bool,
    },

    /// Version of corectl
    #[command(name = "version")]
    Version,

    /// Run a hypervisor under supervision
    #[command(name = "supervise", hide = true)]
    Supervise {
        /// File the hypervisor's console is written to
        #[arg(long)]
        console_log: Option<PathBuf>,

        /// The hypervisor executable
        exe: PathBuf,

        /// Arguments of the hypervisor
        #[arg(last = true)]
        args: Vec<String>,
    },
}

//-------------------------------------------------------------------------------------------------
// Tests
//-------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_args_are_consistent() {
        CorectlArgs::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_volumes_and_taps() -> anyhow::Result<()> {
        let args = CorectlArgs::try_parse_from([
            "corectl", "run", "--channel", "stable", "-p", "a.img,b.img", "--volume", "c.img",
            "--tap", "/dev/tap0", "-D",
        ])?;

        match args.subcommand {
            Some(CorectlSubcommand::Run {
                channel,
                volumes,
                taps,
                detached,
                uuid,
                ..
            }) => {
                assert_eq!(channel, "stable");
                assert_eq!(volumes, ["a.img,b.img", "c.img"]);
                assert_eq!(taps, ["/dev/tap0"]);
                assert!(detached);
                assert_eq!(uuid, "random");
            }
            other => panic!("unexpected {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_parse_aliases_and_supervise() -> anyhow::Result<()> {
        let args = CorectlArgs::try_parse_from(["corectl", "kill", "--all"])?;
        assert!(matches!(
            args.subcommand,
            Some(CorectlSubcommand::Halt { all: true, .. })
        ));

        let args = CorectlArgs::try_parse_from(["corectl", "ssh", "web", "ls", "-la"])?;
        assert!(matches!(
            args.subcommand,
            Some(CorectlSubcommand::Ssh { ref command, .. }) if command == &["ls", "-la"]
        ));

        let args = CorectlArgs::try_parse_from([
            "corectl", "supervise", "--console-log", "/tmp/console.log", "xhyve", "--", "-A",
        ])?;
        match args.subcommand {
            Some(CorectlSubcommand::Supervise { console_log, exe, args }) => {
                assert_eq!(console_log, Some(PathBuf::from("/tmp/console.log")));
                assert_eq!(exe, PathBuf::from("xhyve"));
                assert_eq!(args, ["-A"]);
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(CorectlArgs::try_parse_from(["corectl", "halt"]).is_err());
        Ok(())
    }
}
