use std::{fmt, str::FromStr};

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::{config::LATEST_VERSION, CorectlError};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The kernel of a PXE release.
pub const KERNEL_FILENAME: &str = "coreos_production_pxe.vmlinuz";

/// The initramfs of a PXE release.
pub const INITRD_FILENAME: &str = "coreos_production_pxe_image.cpio.gz";

/// The clear-signed digests published next to every release file.
pub const DIGESTS_SUFFIX: &str = ".DIGESTS.asc";

/// The upstream file naming the newest release of a channel.
pub const VERSION_MANIFEST: &str = "current/version.txt";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A release channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// The bleeding edge channel.
    #[default]
    Alpha,

    /// The pre-release channel.
    Beta,

    /// The stable channel.
    Stable,
}

/// The version part of an image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    /// Whatever is newest.
    Latest,

    /// A specific release.
    Exact(Version),
}

/// Identifies an image build: a channel and a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// The release channel.
    pub channel: Channel,

    /// The requested version.
    pub version: VersionSpec,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Channel {
    /// All channels, in order of decreasing churn.
    pub const ALL: [Channel; 3] = [Channel::Alpha, Channel::Beta, Channel::Stable];

    /// Returns the lowercase name of the channel.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Alpha => "alpha",
            Channel::Beta => "beta",
            Channel::Stable => "stable",
        }
    }

    /// Parses a channel, falling back to the default channel when unrecognized.
    pub fn normalize(value: &str) -> Self {
        value.parse().unwrap_or_else(|_| {
            let fallback = Channel::default();
            tracing::warn!("'{value}' is not a valid channel, using '{fallback}' instead");
            fallback
        })
    }
}

impl VersionSpec {
    /// Parses a version, falling back to `latest` when it isn't a semantic version.
    pub fn normalize(value: &str) -> Self {
        value.parse().unwrap_or_else(|_| {
            tracing::warn!("'{value}' is not a valid version, using '{LATEST_VERSION}' instead");
            VersionSpec::Latest
        })
    }
}

impl ImageRef {
    /// Creates a new image reference.
    pub fn new(channel: Channel, version: VersionSpec) -> Self {
        Self { channel, version }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = CorectlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "alpha" => Ok(Channel::Alpha),
            "beta" => Ok(Channel::Beta),
            "stable" => Ok(Channel::Stable),
            other => Err(CorectlError::UserInput(format!(
                "unknown channel `{other}`"
            ))),
        }
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpec::Latest => f.write_str(LATEST_VERSION),
            VersionSpec::Exact(version) => write!(f, "{version}"),
        }
    }
}

impl FromStr for VersionSpec {
    type Err = CorectlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case(LATEST_VERSION) {
            return Ok(VersionSpec::Latest);
        }
        Ok(VersionSpec::Exact(s.parse()?))
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel, self.version)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
