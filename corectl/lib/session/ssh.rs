use std::{
    ffi::OsString,
    future::Future,
    net::Ipv4Addr,
    path::{Path, PathBuf},
    time::Duration,
};

use ctlutils::{
    term::{self, RawModeGuard},
    Signal,
};
use shell_escape::unix::escape;
use tokio::{
    signal::unix::{signal, SignalKind},
    time::Instant,
};

use crate::{
    config::{Context, REMOTE_USER, SSH_CONNECT_TIMEOUT, SSH_RETRY_INTERVAL},
    instance::InstanceRecord,
    CorectlError, CorectlResult,
};

use super::{CommandOutput, CommandRunner, ProcessCommandRunner};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// What ssh exits with when the connection failed or was dropped.
const SSH_CONNECTION_ERROR: i32 = 255;

/// What ssh reports when the remote side went away mid-command, as it does on shutdown.
const CLOSED_BY_REMOTE: &str = "closed by remote host";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A connection target: a guest address and the key to log in with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    /// The user to log in as.
    pub user: String,

    /// The guest address.
    pub host: Ipv4Addr,

    /// The private key to authenticate with.
    pub key: PathBuf,
}

/// The signals that end an interactive session.
struct TerminalSignals {
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
}

/// How an interactive session ended.
enum SessionEnd {
    Exited(CorectlResult<Option<i32>>),
    Signalled(Signal),
}

/// Remote commands, shells and uploads to one running instance over the system `ssh`.
#[derive(Debug, Clone)]
pub struct SshSession<R = ProcessCommandRunner> {
    ssh_exe: PathBuf,
    target: SshTarget,
    runner: R,
    retry_interval: Duration,
    connect_timeout: Duration,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SshTarget {
    /// The target of a running instance.
    pub fn for_instance(record: &InstanceRecord) -> CorectlResult<Self> {
        let host = record.get_public_ip().ok_or_else(|| {
            CorectlError::Process(format!(
                "`{}` has not reported its address yet",
                record.get_name()
            ))
        })?;
        let key = record.get_internal_key().as_ref().ok_or_else(|| {
            CorectlError::Process(format!("`{}` has no ssh key", record.get_name()))
        })?;

        Ok(Self {
            user: REMOTE_USER.to_string(),
            host,
            key: key.private_key.clone(),
        })
    }
}

impl SshSession<ProcessCommandRunner> {
    /// Opens a session to a running instance.
    pub fn for_instance(ctx: &Context, record: &InstanceRecord) -> CorectlResult<Self> {
        Ok(Self::new(
            ctx.get_ssh_exe(),
            SshTarget::for_instance(record)?,
            ProcessCommandRunner,
        ))
    }
}

impl<R: CommandRunner> SshSession<R> {
    /// Creates a session to `target` running commands through `runner`.
    pub fn new(ssh_exe: impl Into<PathBuf>, target: SshTarget, runner: R) -> Self {
        Self {
            ssh_exe: ssh_exe.into(),
            target,
            runner,
            retry_interval: SSH_RETRY_INTERVAL,
            connect_timeout: SSH_CONNECT_TIMEOUT,
        }
    }

    /// Sets how often and for how long [`SshSession::connect`] retries.
    pub fn with_retry(mut self, interval: Duration, timeout: Duration) -> Self {
        self.retry_interval = interval;
        self.connect_timeout = timeout;
        self
    }

    /// The connection target.
    pub fn target(&self) -> &SshTarget {
        &self.target
    }

    /// Waits until the guest accepts a login.
    ///
    /// Failed attempts are retried until the connect timeout elapses, only the last one is
    /// reported.
    pub async fn connect(&self) -> CorectlResult<()> {
        let deadline = Instant::now() + self.connect_timeout;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let output = self.run_remote("true", None).await?;
            if output.is_success() {
                tracing::debug!("connected to {} after {attempt} attempt(s)", self.target.host);
                return Ok(());
            }

            if Instant::now() + self.retry_interval > deadline {
                return Err(CorectlError::Process(format!(
                    "unable to reach {}@{}: {}",
                    self.target.user,
                    self.target.host,
                    output.stderr.trim()
                )));
            }

            tracing::debug!("{} not reachable yet, retrying", self.target.host);
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    /// Runs `command` in the guest and returns its combined output.
    ///
    /// A connection dropped by the guest mid-command is not a failure.
    pub async fn exec(&self, command: &str) -> CorectlResult<String> {
        let output = self.run_remote(command, None).await?;
        if output.is_success() || is_closed_by_remote(&output) {
            return Ok(output.combined());
        }

        Err(remote_failure(command, &output))
    }

    /// Opens an interactive shell in the guest, or runs `command` on a terminal, and returns
    /// the remote exit code.
    ///
    /// The caller's terminal is put in raw mode for the duration and restored however the
    /// session ends. When SIGTERM, SIGHUP or SIGINT arrives, the terminal is restored before the
    /// signal is passed on to ssh, and the session ends with `128 + signal`.
    pub async fn shell(&self, command: Option<&str>) -> CorectlResult<i32> {
        let mut args = self.base_args();
        args.insert(0, "-tt".into());
        if let Some(command) = command {
            args.push(command.into());
        }

        // Registered before raw mode so an early signal is not lost
        let mut signals = TerminalSignals::new()?;
        let guard = if term::is_interactive_terminal() {
            Some(RawModeGuard::new()?)
        } else {
            None
        };

        self.relay(&args, guard, signals.recv()).await
    }

    /// Copies the local file `source` to `destination` in the guest.
    ///
    /// The destination's parent must exist. If the destination is an existing directory, the
    /// file is placed inside it under its own name. Returns the remote path written, after
    /// checking that its size matches the source.
    pub async fn upload(&self, source: &Path, destination: &str) -> CorectlResult<String> {
        let metadata = tokio::fs::metadata(source).await.map_err(|e| {
            CorectlError::UserInput(format!("unable to read {}: {e}", source.display()))
        })?;
        if !metadata.is_file() {
            return Err(CorectlError::UserInput(format!(
                "{} is not a regular file",
                source.display()
            )));
        }

        let parent = Path::new(destination)
            .parent()
            .map(|parent| parent.to_string_lossy().into_owned())
            .filter(|parent| !parent.is_empty());
        if let Some(parent) = parent {
            if !self.test_dir(&parent).await? {
                return Err(CorectlError::UserInput(format!(
                    "remote directory {parent} does not exist"
                )));
            }
        }

        let mut target = destination.to_string();
        if self.test_dir(destination).await? {
            let name = source
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            target = format!("{}/{name}", destination.trim_end_matches('/'));
        }

        let quoted = escape(target.as_str().into());
        tracing::info!("copying {} to {}:{target}", source.display(), self.target.host);
        let command = format!("cat > {quoted}");
        let output = self.run_remote(&command, Some(source)).await?;
        if !output.is_success() {
            return Err(remote_failure(&command, &output));
        }

        let size = self.exec(&format!("stat -c %s {quoted}")).await?;
        let size: u64 = size.trim().parse().map_err(|_| {
            CorectlError::Process(format!("unexpected size of {target}: {}", size.trim()))
        })?;
        if size != metadata.len() {
            return Err(CorectlError::Process(format!(
                "{target} is {size} bytes, expected {}",
                metadata.len()
            )));
        }

        Ok(target)
    }
}

//--------------------------------------------------------------------------------------------------
// Methods: Helpers
//--------------------------------------------------------------------------------------------------

impl<R: CommandRunner> SshSession<R> {
    fn base_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-i".into(), self.target.key.clone().into()];
        for option in [
            "BatchMode=yes",
            "StrictHostKeyChecking=no",
            "UserKnownHostsFile=/dev/null",
            "LogLevel=ERROR",
            "ConnectTimeout=2",
        ] {
            args.push("-o".into());
            args.push(option.into());
        }
        args.push(format!("{}@{}", self.target.user, self.target.host).into());
        args
    }

    async fn run_remote(&self, command: &str, stdin: Option<&Path>) -> CorectlResult<CommandOutput> {
        let mut args = self.base_args();
        args.push(command.into());
        self.runner.run(&self.ssh_exe, &args, stdin).await
    }

    /// Runs ssh on the terminal until it exits or `signal` resolves. `guard` is dropped before
    /// anything else happens in either case.
    async fn relay<G: Send>(
        &self,
        args: &[OsString],
        guard: G,
        signal: impl Future<Output = Signal> + Send,
    ) -> CorectlResult<i32> {
        let mut child = self.runner.spawn_interactive(&self.ssh_exe, args)?;
        let end = tokio::select! {
            status = child.wait() => SessionEnd::Exited(status),
            signal = signal => SessionEnd::Signalled(signal),
        };
        drop(guard);

        match end {
            SessionEnd::Exited(status) => Ok(status?.unwrap_or(SSH_CONNECTION_ERROR)),
            SessionEnd::Signalled(signal) => {
                tracing::info!("received {}, closing the session", signal.as_str());
                child.signal(signal)?;
                child.wait().await?;
                Ok(128 + signal as i32)
            }
        }
    }

    async fn test_dir(&self, path: &str) -> CorectlResult<bool> {
        let output = self
            .run_remote(&format!("test -d {}", escape(path.into())), None)
            .await?;
        Ok(output.is_success())
    }
}

impl TerminalSignals {
    fn new() -> CorectlResult<Self> {
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    async fn recv(&mut self) -> Signal {
        tokio::select! {
            _ = self.terminate.recv() => Signal::SIGTERM,
            _ = self.hangup.recv() => Signal::SIGHUP,
            _ = self.interrupt.recv() => Signal::SIGINT,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn is_closed_by_remote(output: &CommandOutput) -> bool {
    output.code == Some(SSH_CONNECTION_ERROR) && output.stderr.contains(CLOSED_BY_REMOTE)
}

fn remote_failure(command: &str, output: &CommandOutput) -> CorectlError {
    let status = output
        .code
        .map(|code| code.to_string())
        .unwrap_or_else(|| "a signal".to_string());
    CorectlError::Process(format!(
        "`{command}` exited with {status}: {}",
        output.combined().trim()
    ))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
