//! Image references, the local image store and the pull pipeline.
//!
//! Pulling an image downloads the PXE kernel and initramfs of a release, checks them against
//! the release's signed digests, and rewrites the initramfs so it carries the OEM hooks a
//! guest bootstraps itself with (see [`oem`]).

mod customize;
mod fetch;
mod reference;
mod store;
mod verify;

pub mod oem;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use customize::*;
pub use fetch::*;
pub use reference::*;
pub use store::*;
pub use verify::*;
