//! Defaults and the runtime context.

mod context;
mod defaults;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use context::*;
pub use defaults::*;
