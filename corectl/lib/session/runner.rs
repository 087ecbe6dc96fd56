use std::{
    ffi::OsString,
    path::Path,
    process::{ExitStatus, Stdio},
};

use async_trait::async_trait;
use ctlutils::{signal_process, Signal};
use tokio::process::{Child, Command};

use crate::{CorectlError, CorectlResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Result of running an external command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,

    /// Captured standard output.
    pub stdout: String,

    /// Captured standard error.
    pub stderr: String,
}

/// Runs external programs. Implemented by fakes in tests.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args`, capturing its output.
    ///
    /// When `stdin` is given, the file at that path is fed to the program's standard input.
    async fn run(
        &self,
        program: &Path,
        args: &[OsString],
        stdin: Option<&Path>,
    ) -> CorectlResult<CommandOutput>;

    /// Starts `program` with `args` attached to the caller's terminal.
    fn spawn_interactive(
        &self,
        program: &Path,
        args: &[OsString],
    ) -> CorectlResult<Box<dyn InteractiveChild>>;
}

/// A program running on the caller's terminal.
#[async_trait]
pub trait InteractiveChild: Send {
    /// Waits for the program to exit and returns its exit code, if it has one.
    async fn wait(&mut self) -> CorectlResult<Option<i32>>;

    /// Sends `signal` to the program.
    fn signal(&self, signal: Signal) -> CorectlResult<()>;
}

/// A [`CommandRunner`] that spawns real processes.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

/// An [`InteractiveChild`] backed by a real process.
#[derive(Debug)]
pub struct TerminalChild {
    child: Child,
    pid: Option<u32>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    pub fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Standard output followed by standard error.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl CommandRunner for ProcessCommandRunner {
    async fn run(
        &self,
        program: &Path,
        args: &[OsString],
        stdin: Option<&Path>,
    ) -> CorectlResult<CommandOutput> {
        let mut command = Command::new(program);
        command.args(args);
        command.stdin(match stdin {
            Some(path) => Stdio::from(std::fs::File::open(path)?),
            None => Stdio::null(),
        });

        let output = command.output().await.map_err(|e| spawn_error(program, e))?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn spawn_interactive(
        &self,
        program: &Path,
        args: &[OsString],
    ) -> CorectlResult<Box<dyn InteractiveChild>> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| spawn_error(program, e))?;

        let pid = child.id();
        Ok(Box::new(TerminalChild { child, pid }))
    }
}

#[async_trait]
impl InteractiveChild for TerminalChild {
    async fn wait(&mut self) -> CorectlResult<Option<i32>> {
        let status: ExitStatus = self.child.wait().await?;
        self.pid = None;
        Ok(status.code())
    }

    fn signal(&self, signal: Signal) -> CorectlResult<()> {
        match self.pid {
            Some(pid) => Ok(signal_process(pid, signal)?),
            None => Ok(()),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn spawn_error(program: &Path, error: std::io::Error) -> CorectlError {
    CorectlError::Process(format!("failed to spawn {}: {error}", program.display()))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_process_runner_captures_output_and_stdin() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("input.txt");
        std::fs::write(&input, "from a file")?;

        let output = ProcessCommandRunner
            .run(
                Path::new("sh"),
                &["-c".into(), "cat; echo oops >&2; exit 4".into()],
                Some(&input),
            )
            .await?;

        assert_eq!(output.code, Some(4));
        assert!(!output.is_success());
        assert_eq!(output.stdout, "from a file");
        assert_eq!(output.combined(), "from a fileoops\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_terminal_child_forwards_signals() -> anyhow::Result<()> {
        let mut child = ProcessCommandRunner
            .spawn_interactive(Path::new("sh"), &["-c".into(), "sleep 30".into()])?;

        child.signal(Signal::SIGTERM)?;
        assert_eq!(child.wait().await?, None);

        // Signalling a reaped child is a no-op
        child.signal(Signal::SIGTERM)?;
        Ok(())
    }

    #[tokio::test]
    async fn test_process_runner_reports_missing_programs() {
        let result = ProcessCommandRunner
            .run(Path::new("/nonexistent/ssh"), &[], None)
            .await;
        assert!(matches!(result, Err(CorectlError::Process(_))));
    }
}
