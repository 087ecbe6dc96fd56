//! Module containing terminal utilities

use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

use crate::CtlutilsResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// RAII guard that puts the terminal in raw mode and restores it on drop.
///
/// The guard restores the terminal on every exit path, panics and early returns included.
pub struct RawModeGuard {
    _private: (),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RawModeGuard {
    /// Enables raw mode and returns a guard that restores the previous mode on drop.
    pub fn new() -> CtlutilsResult<Self> {
        enable_raw_mode()?;
        Ok(Self { _private: () })
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            tracing::warn!("failed to restore terminal mode: {}", e);
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Determines if the process is running in an interactive terminal environment
pub fn is_interactive_terminal() -> bool {
    // Check if stdin and stdout are TTYs
    let stdin_is_tty = unsafe { libc::isatty(libc::STDIN_FILENO) == 1 };
    let stdout_is_tty = unsafe { libc::isatty(libc::STDOUT_FILENO) == 1 };
    let is_tty = stdin_is_tty && stdout_is_tty;

    if is_tty && std::env::var("TERM").is_err() {
        tracing::debug!("detected TTY without TERM environment variable");
    }

    is_tty
}
