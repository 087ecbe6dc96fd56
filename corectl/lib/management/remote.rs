//! Remote commands: shells, commands and file copies into running instances.

use std::path::Path;

use crate::{
    config::Context, instance::Registry, session::SshSession, CorectlError, CorectlResult,
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Opens a shell in an instance, or runs `command` there, and returns the remote exit code.
///
/// When stdout is not a terminal the command runs without one and its output is printed.
pub async fn ssh(ctx: &Context, id: &str, command: &[String]) -> CorectlResult<i32> {
    let record = Registry::from_context(ctx).find(id).await?;
    let session = SshSession::for_instance(ctx, &record)?;
    session.connect().await?;

    if command.is_empty() {
        return session.shell(None).await;
    }

    let command = command.join(" ");
    if ctlutils::term::is_interactive_terminal() {
        return session.shell(Some(command.as_str())).await;
    }

    print!("{}", session.exec(&command).await?);
    Ok(0)
}

/// Copies a local file into an instance. `destination` reads `<id>:<path>`.
pub async fn put(ctx: &Context, source: &Path, destination: &str) -> CorectlResult<()> {
    let (id, path) = split_destination(destination)?;
    let record = Registry::from_context(ctx).find(id).await?;
    let session = SshSession::for_instance(ctx, &record)?;
    session.connect().await?;

    let written = session.upload(&ctx.absolute(source), path).await?;
    tracing::info!("copied {} to {}:{written}", source.display(), record.get_name());
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn split_destination(destination: &str) -> CorectlResult<(&str, &str)> {
    match destination.split_once(':') {
        Some((id, path)) if !id.is_empty() && !path.is_empty() => Ok((id, path)),
        _ => Err(CorectlError::UserInput(format!(
            "destination `{destination}` should read <instance>:<path>"
        ))),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
