//! Hypervisor invocation, boot orchestration, halting and the NFS share of the host's
//! home directories.
//!
//! An instance runs as a hypervisor process owned by a supervisor, which is corectl itself
//! re-executed with the hidden `supervise` subcommand. The supervisor's PID is what gets
//! recorded, so a live instance always shows up in the process table under corectl's name.

mod command;
mod halt;
mod orchestrator;
mod request;
mod share;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use command::*;
pub use halt::*;
pub use orchestrator::*;
pub use request::*;
pub use share::*;
