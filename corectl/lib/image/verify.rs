use std::{path::{Path, PathBuf}, sync::LazyLock};

use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use reqwest::Client;
use sha2::{Digest, Sha512};
use tokio::{fs, io::AsyncWriteExt, process::Command};

use crate::{CorectlError, CorectlResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Fingerprint of the CoreOS buildbot image signing key.
pub const TRUSTED_KEY_FINGERPRINT: &str = "04127D0BFABEC8871FFB2CCE50E0885593D2DCB4";

const CLEARSIGN_HEADER: &str = "-----BEGIN PGP SIGNED MESSAGE-----";
const SIGNATURE_HEADER: &str = "-----BEGIN PGP SIGNATURE-----";

static DIGEST_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)(?P<method>SHA1|SHA512) HASH\r?\n(?P<hash>[^\s]+)\s*(?P<file>[\w.]*)")
        .unwrap_or_else(|e| unreachable!("digest pattern is valid: {e}"))
});

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One `<ALGORITHM> HASH` stanza of a digest manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestEntry {
    /// The hash algorithm, as named in the manifest.
    pub algorithm: String,

    /// The hex encoded digest.
    pub hash: String,

    /// The file the digest is for.
    pub file: String,
}

/// Checks the signature of a clear-signed document.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    /// Verifies `signed` and returns its cleartext.
    ///
    /// Fails with [`CorectlError::Verification`] if the document isn't signed by the trusted
    /// key.
    async fn verify(&self, signed: &[u8]) -> CorectlResult<String>;
}

/// A [`SignatureVerifier`] backed by the system `gpg`.
///
/// The trusted key has to be present in the invoking user's keyring.
#[derive(Debug, Clone)]
pub struct GpgVerifier {
    gpg_exe: PathBuf,
    fingerprint: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl GpgVerifier {
    /// Creates a verifier trusting only the CoreOS signing key.
    pub fn new(gpg_exe: impl Into<PathBuf>) -> Self {
        Self::with_fingerprint(gpg_exe, TRUSTED_KEY_FINGERPRINT)
    }

    /// Creates a verifier trusting only the key with the given fingerprint.
    pub fn with_fingerprint(gpg_exe: impl Into<PathBuf>, fingerprint: impl Into<String>) -> Self {
        Self {
            gpg_exe: gpg_exe.into(),
            fingerprint: fingerprint.into().to_ascii_uppercase(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl SignatureVerifier for GpgVerifier {
    async fn verify(&self, signed: &[u8]) -> CorectlResult<String> {
        let mut document = tempfile::NamedTempFile::new()?;
        std::io::Write::write_all(&mut document, signed)?;

        let output = Command::new(&self.gpg_exe)
            .args(["--batch", "--no-tty", "--status-fd", "1", "--verify"])
            .arg(document.path())
            .output()
            .await
            .map_err(|e| {
                CorectlError::Process(format!("failed to run {}: {e}", self.gpg_exe.display()))
            })?;

        let status = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() || !has_valid_signature(&status, &self.fingerprint) {
            tracing::debug!("gpg status: {status}");
            return Err(CorectlError::Verification(
                "signature check for DIGESTS failed".to_string(),
            ));
        }

        tracing::debug!("DIGESTS signature OK");
        clearsigned_body(&String::from_utf8_lossy(signed))
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Extracts every digest stanza of a manifest.
pub fn parse_digests(manifest: &str) -> Vec<DigestEntry> {
    DIGEST_PATTERN
        .captures_iter(manifest)
        .map(|caps| DigestEntry {
            algorithm: caps["method"].to_string(),
            hash: caps["hash"].to_ascii_lowercase(),
            file: caps["file"].to_string(),
        })
        .collect()
}

/// Returns the SHA-512 digest the manifest states for `file`.
pub fn expected_sha512(manifest: &str, file: &str) -> Option<String> {
    parse_digests(manifest)
        .into_iter()
        .find(|entry| entry.algorithm == "SHA512" && entry.file == file)
        .map(|entry| entry.hash)
}

/// Downloads `url` to `dest`, hashing it on the way.
///
/// If the SHA-512 of what was downloaded is not `expected`, `dest` is deleted and a
/// [`CorectlError::Verification`] is returned.
pub async fn download_verified(
    client: &Client,
    url: &str,
    dest: &Path,
    expected: &str,
) -> CorectlResult<()> {
    tracing::info!("downloading {url}");
    let response = client.get(url).send().await?.error_for_status()?;

    let mut file = fs::File::create(dest).await?;
    let mut hasher = Sha512::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    drop(file);

    let actual = hex::encode(hasher.finalize());
    if !actual.eq_ignore_ascii_case(expected) {
        fs::remove_file(dest).await?;
        return Err(CorectlError::Verification(format!(
            "SHA512 hash of {url} is {actual}, expected {expected}"
        )));
    }

    tracing::debug!("SHA512 of {} OK", dest.display());
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Looks for a `VALIDSIG` status line whose signing or primary key is `fingerprint`.
fn has_valid_signature(status: &str, fingerprint: &str) -> bool {
    status
        .lines()
        .filter_map(|line| line.strip_prefix("[GNUPG:] VALIDSIG "))
        .any(|rest| {
            let fields: Vec<_> = rest.split_whitespace().collect();
            fields.first().is_some_and(|f| f.eq_ignore_ascii_case(fingerprint))
                || (fields.len() >= 10 && fields[fields.len() - 1].eq_ignore_ascii_case(fingerprint))
        })
}

/// Returns the signed text of a clear-signed document, with dash-escaping undone.
fn clearsigned_body(document: &str) -> CorectlResult<String> {
    let malformed = || CorectlError::Verification("malformed clear-signed document".to_string());

    let mut lines = document.lines();
    lines.find(|line| line.trim_end() == CLEARSIGN_HEADER).ok_or_else(malformed)?;

    // Armor headers run up to the first empty line.
    lines.find(|line| line.trim().is_empty()).ok_or_else(malformed)?;

    let mut body = Vec::new();
    for line in lines {
        if line.trim_end() == SIGNATURE_HEADER {
            return Ok(body.join("\n"));
        }
        body.push(line.strip_prefix("- ").unwrap_or(line));
    }

    Err(malformed())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
