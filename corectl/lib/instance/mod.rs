//! Instance records and the instance registry.

mod mac;
mod record;
mod registry;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use mac::*;
pub use record::*;
pub use registry::*;
