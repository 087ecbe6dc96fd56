use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};

use tokio::{
    process::{Child, Command},
    signal::unix::{signal, SignalKind},
};

use super::{signal_process, Signal};
use crate::CtlutilsResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Where the supervised child's standard streams go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Console {
    /// The child shares the supervisor's standard streams.
    Inherit,

    /// The child's stdout and stderr are appended to a file and stdin is closed.
    File(PathBuf),
}

/// A supervisor that owns a child process for its whole life.
///
/// The supervisor forwards SIGTERM and SIGINT to the child as SIGTERM and then waits for it,
/// so stopping the supervisor always stops the child first.
pub struct Supervisor {
    /// Path to the child executable
    child_exe: PathBuf,

    /// Arguments to pass to the child executable
    child_args: Vec<String>,

    /// Environment variables for the child process
    child_envs: Vec<(String, String)>,

    /// Where the child's output goes
    console: Console,

    /// The managed child process ID
    child_pid: Option<u32>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Supervisor {
    /// Creates a new supervisor instance.
    ///
    /// ## Arguments
    ///
    /// * `child_exe` - Path to the child executable
    /// * `child_args` - Arguments to pass to the child executable
    /// * `child_envs` - Environment variables for the child process
    /// * `console` - Where the child's standard streams go
    pub fn new(
        child_exe: impl AsRef<Path>,
        child_args: impl IntoIterator<Item = impl Into<String>>,
        child_envs: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
        console: Console,
    ) -> Self {
        Self {
            child_exe: child_exe.as_ref().to_path_buf(),
            child_args: child_args.into_iter().map(Into::into).collect(),
            child_envs: child_envs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            console,
            child_pid: None,
        }
    }

    /// The PID of the running child, if it has been started and not yet reaped.
    pub fn child_pid(&self) -> Option<u32> {
        self.child_pid
    }

    /// Starts the child process and waits for it to exit.
    ///
    /// Returns the exit status of the child, whether it exited on its own or because a
    /// termination signal received by the supervisor was forwarded to it.
    pub async fn start(&mut self) -> CtlutilsResult<ExitStatus> {
        // Register handlers before spawning so an early signal is not lost.
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        let mut child = self.spawn()?;
        let child_pid = child.id();
        self.child_pid = child_pid;
        tracing::info!(exe = %self.child_exe.display(), pid = ?child_pid, "started child process");

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM signal");
                self.stop_child(&mut child).await?
            }
            _ = sigint.recv() => {
                tracing::info!("received SIGINT signal");
                self.stop_child(&mut child).await?
            }
        };

        if status.success() {
            tracing::info!(pid = ?child_pid, "child process exited successfully");
        } else {
            tracing::warn!(pid = ?child_pid, %status, "child process exited");
        }

        self.child_pid = None;
        Ok(status)
    }

    fn spawn(&self) -> CtlutilsResult<Child> {
        let mut command = Command::new(&self.child_exe);
        command
            .args(&self.child_args)
            .envs(self.child_envs.iter().map(|(k, v)| (k, v)));

        if let Console::File(path) = &self.console {
            let log = OpenOptions::new().create(true).append(true).open(path)?;
            command
                .stdin(Stdio::null())
                .stdout(log.try_clone()?)
                .stderr(log);
        }

        Ok(command.spawn()?)
    }

    async fn stop_child(&mut self, child: &mut Child) -> CtlutilsResult<ExitStatus> {
        if let Some(pid) = self.child_pid.take() {
            if let Err(e) = signal_process(pid, Signal::SIGTERM) {
                tracing::error!("failed to send SIGTERM to process {}: {}", pid, e);
            }
        }

        Ok(child.wait().await?)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::os::unix::process::ExitStatusExt;

    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_supervisor_reports_child_exit_status() -> anyhow::Result<()> {
        let mut supervisor = Supervisor::new(
            "/bin/sh",
            ["-c", "exit 3"],
            Vec::<(String, String)>::new(),
            Console::Inherit,
        );

        let status = supervisor.start().await?;

        assert_eq!(status.code(), Some(3));
        assert_eq!(supervisor.child_pid(), None);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_supervisor_writes_console_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let console = dir.path().join("console.log");
        let mut supervisor = Supervisor::new(
            "/bin/sh",
            ["-c", "echo \"booting $GUEST\"; echo oops >&2"],
            [("GUEST", "core-01")],
            Console::File(console.clone()),
        );

        let status = supervisor.start().await?;
        let output = std::fs::read_to_string(&console)?;

        assert!(status.success());
        assert!(output.contains("booting core-01"));
        assert!(output.contains("oops"));
        assert_eq!(status.signal(), None);
        Ok(())
    }
}
