//! `ctlutils` is a library containing general utilities for the corectl project.
//!
//! It knows nothing about instances or images. It provides:
//! - [`cpio`] - a streaming codec for the "new ASCII" cpio archive format
//! - [`runtime`] - process table inspection and the hypervisor supervisor
//! - [`term`] - terminal helpers for interactive sessions
//! - [`path`] - executable resolution helpers

#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod cpio;
pub mod error;
pub mod path;
pub mod runtime;
pub mod term;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use error::*;
pub use path::*;
pub use runtime::*;
