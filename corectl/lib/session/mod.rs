//! Remote sessions to running instances.
//!
//! corectl logs into guests as `core` with the key pair it generated for the instance, going
//! through the system `ssh` client.

mod keys;
mod runner;
mod ssh;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use keys::*;
pub use runner::*;
pub use ssh::*;
