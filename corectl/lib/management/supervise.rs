//! The body of the hidden `supervise` subcommand.

use std::{
    os::unix::process::ExitStatusExt,
    path::{Path, PathBuf},
    process::ExitStatus,
};

use ctlutils::runtime::{Console, Supervisor};

use crate::CorectlResult;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Runs the hypervisor until it exits and returns the code to exit with.
///
/// With `console_log`, the hypervisor's console is appended there. Otherwise it shares this
/// process's terminal.
pub async fn supervise(
    console_log: Option<PathBuf>,
    exe: &Path,
    args: Vec<String>,
) -> CorectlResult<i32> {
    let console = match console_log {
        Some(path) => Console::File(path),
        None => Console::Inherit,
    };

    tracing::info!("supervising {}", exe.display());
    let mut supervisor = Supervisor::new(exe, args, Vec::<(String, String)>::new(), console);
    let status = supervisor.start().await?;

    let code = exit_code(&status);
    tracing::info!("{} exited with {code}", exe.display());
    Ok(code)
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Shell convention: signals map to 128 plus the signal number.
fn exit_code(status: &ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
