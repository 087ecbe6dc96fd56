//! The operations behind each corectl subcommand.
//!
//! Every function here takes a [`Context`](crate::config::Context), prints what the user asked
//! for on stdout and leaves diagnostics to `tracing`.

pub mod image;
pub mod instance;
pub mod remote;
pub mod supervise;
