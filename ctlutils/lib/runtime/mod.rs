//! `ctlutils::runtime` is a module containing process utilities for the corectl project.

mod process;
mod supervisor;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use process::*;
pub use supervisor::*;
