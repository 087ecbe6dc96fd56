use nix::{sys::signal::kill, unistd::Pid as NixPid};
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

use crate::CtlutilsResult;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use nix::sys::signal::Signal;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// A view of the host process table.
///
/// Liveness checks go through this capability so they can be exercised against a fake table
/// in tests.
pub trait ProcessTable: Send + Sync {
    /// Returns the executable name of the running process with the given PID, if any.
    ///
    /// Processes that have exited but not yet been reaped are reported as absent.
    fn find(&self, pid: u32) -> Option<String>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The real process table of the host, queried through `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessTable;

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl ProcessTable for SystemProcessTable {
    fn find(&self, pid: u32) -> Option<String> {
        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

        let process = system.process(pid)?;
        if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
            return None;
        }

        Some(process.name().to_string_lossy().into_owned())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Sends `signal` to the process with the given PID.
pub fn signal_process(pid: u32, signal: Signal) -> CtlutilsResult<()> {
    tracing::debug!(pid, ?signal, "signalling process");
    kill(NixPid::from_raw(pid as i32), signal).map_err(std::io::Error::from)?;
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_process_table_finds_current_process() {
        let table = SystemProcessTable;
        let name = table.find(std::process::id());

        assert!(name.is_some_and(|n| !n.is_empty()));
    }

    #[test]
    fn test_system_process_table_misses_unused_pid() {
        // Above the largest pid_max Linux allows.
        assert_eq!(SystemProcessTable.find(99_999_999), None);
    }

    #[test]
    fn test_signal_process_reports_missing_process() {
        assert!(signal_process(99_999_999, Signal::SIGTERM).is_err());
    }
}
