//! `corectl` runs CoreOS virtual machines on top of a lightweight hypervisor.
//!
//! # Overview
//!
//! corectl manages the whole lifecycle of local CoreOS instances. It handles:
//! - Pulling, verifying and customizing CoreOS PXE images
//! - Booting instances with unique identities, tap devices and volumes
//! - Discovering each guest's address through a short-lived metadata service
//! - Inspecting, attaching to and halting running instances
//!
//! # Architecture
//!
//! - **Image**: release lookup, signed digest verification and OEM customization of the
//!   initramfs (see [`image`])
//! - **Instance**: the persisted instance record and the registry of live instances
//!   (see [`instance`])
//! - **Metadata**: the HTTP endpoint a booting guest bootstraps itself from (see [`metadata`])
//! - **VM**: hypervisor command assembly, the boot orchestrator and halting (see [`vm`])
//! - **Session**: remote commands, shells and uploads over `ssh` (see [`session`])
//!
//! Every component receives an explicit [`config::Context`] instead of reading global state.
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`config`] - Defaults and the runtime context
//! - [`image`] - Image references, the local image store and the pull pipeline
//! - [`instance`] - Instance records and the instance registry
//! - [`management`] - The operations behind each subcommand
//! - [`metadata`] - The guest metadata service
//! - [`session`] - Remote sessions to running instances
//! - [`utils`] - Common utilities and helpers
//! - [`vm`] - Hypervisor invocation, boot orchestration and halt

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod cli;
pub mod config;
pub mod image;
pub mod instance;
pub mod management;
pub mod metadata;
pub mod session;
pub mod utils;
pub mod vm;

pub use error::*;
