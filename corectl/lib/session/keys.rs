use std::path::Path;

use crate::{instance::SshKeyPair, CorectlError, CorectlResult};

use super::CommandRunner;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// File name of an instance's private key inside its state directory.
pub const PRIVATE_KEY_FILENAME: &str = "id_ed25519";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Generates a passphrase-less key pair in `dir` with `ssh-keygen`.
pub async fn generate_key_pair(
    runner: &dyn CommandRunner,
    ssh_keygen_exe: &Path,
    dir: &Path,
    comment: &str,
) -> CorectlResult<SshKeyPair> {
    let private_key = dir.join(PRIVATE_KEY_FILENAME);
    let args = [
        "-t".into(),
        "ed25519".into(),
        "-N".into(),
        "".into(),
        "-q".into(),
        "-C".into(),
        comment.into(),
        "-f".into(),
        private_key.clone().into_os_string(),
    ];

    let output = runner.run(ssh_keygen_exe, &args, None).await?;
    if !output.is_success() {
        return Err(CorectlError::Process(format!(
            "ssh-keygen failed: {}",
            output.combined().trim()
        )));
    }

    let public_key = tokio::fs::read_to_string(private_key.with_extension("pub")).await?;
    Ok(SshKeyPair {
        private_key,
        public_key: public_key.trim().to_string(),
    })
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
