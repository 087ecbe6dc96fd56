use std::path::{Path, PathBuf};

use semver::Version;
use tokio::fs;

use crate::CorectlResult;

use super::{Channel, INITRD_FILENAME, KERNEL_FILENAME};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The on-disk cache of pulled images, laid out as `<root>/<channel>/<version>/`.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ImageStore {
    /// Creates a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory of a channel.
    pub fn channel_dir(&self, channel: Channel) -> PathBuf {
        self.root.join(channel.as_str())
    }

    /// Returns the directory of an image.
    pub fn version_dir(&self, channel: Channel, version: &Version) -> PathBuf {
        self.channel_dir(channel).join(version.to_string())
    }

    /// Returns the kernel of an image.
    pub fn kernel_path(&self, channel: Channel, version: &Version) -> PathBuf {
        self.version_dir(channel, version).join(KERNEL_FILENAME)
    }

    /// Returns the customized initramfs of an image.
    pub fn initrd_path(&self, channel: Channel, version: &Version) -> PathBuf {
        self.version_dir(channel, version).join(INITRD_FILENAME)
    }

    /// Returns whether both files of an image are present.
    pub fn contains(&self, channel: Channel, version: &Version) -> bool {
        self.kernel_path(channel, version).is_file() && self.initrd_path(channel, version).is_file()
    }

    /// Lists the versions available locally for a channel, oldest first.
    ///
    /// Hidden entries (in-flight pulls) and directories not named after a version are ignored.
    pub async fn local_versions(&self, channel: Channel) -> CorectlResult<Vec<Version>> {
        let dir = self.channel_dir(channel);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut versions = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') || !entry.file_type().await?.is_dir() {
                continue;
            }

            match Version::parse(&name) {
                Ok(version) => versions.push(version),
                Err(_) => tracing::debug!("ignoring {} in image store", entry.path().display()),
            }
        }

        versions.sort();
        Ok(versions)
    }

    /// Returns the newest local version of a channel.
    pub async fn newest(&self, channel: Channel) -> CorectlResult<Option<Version>> {
        Ok(self.local_versions(channel).await?.pop())
    }

    /// Removes an image. Returns whether anything was removed.
    pub async fn remove(&self, channel: Channel, version: &Version) -> CorectlResult<bool> {
        let dir = self.version_dir(channel, version);
        if !dir.exists() {
            return Ok(false);
        }

        fs::remove_dir_all(&dir).await?;
        tracing::info!("removed {channel}/{version}");
        Ok(true)
    }

    /// Removes every image of a channel but the newest. Returns the removed versions.
    pub async fn prune(&self, channel: Channel) -> CorectlResult<Vec<Version>> {
        let mut versions = self.local_versions(channel).await?;
        versions.pop();

        for version in &versions {
            self.remove(channel, version).await?;
        }

        Ok(versions)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    async fn install(store: &ImageStore, channel: Channel, version: &str) -> anyhow::Result<()> {
        let version = Version::parse(version)?;
        fs::create_dir_all(store.version_dir(channel, &version)).await?;
        fs::write(store.kernel_path(channel, &version), b"kernel").await?;
        fs::write(store.initrd_path(channel, &version), b"initrd").await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_store_lists_versions_semantically() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = ImageStore::new(root.path());

        install(&store, Channel::Alpha, "1010.1.0").await?;
        install(&store, Channel::Alpha, "899.17.0").await?;
        install(&store, Channel::Alpha, "1068.0.0").await?;
        fs::create_dir_all(store.channel_dir(Channel::Alpha).join(".pull-abc")).await?;
        fs::create_dir_all(store.channel_dir(Channel::Alpha).join("junk")).await?;

        let versions = store.local_versions(Channel::Alpha).await?;
        let names: Vec<_> = versions.iter().map(ToString::to_string).collect();
        assert_eq!(names, ["899.17.0", "1010.1.0", "1068.0.0"]);

        assert!(store.local_versions(Channel::Beta).await?.is_empty());
        assert_eq!(
            store.newest(Channel::Alpha).await?,
            Some(Version::new(1068, 0, 0))
        );
        assert!(store.contains(Channel::Alpha, &Version::new(899, 17, 0)));
        Ok(())
    }

    #[tokio::test]
    async fn test_store_prune_keeps_newest() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = ImageStore::new(root.path());

        install(&store, Channel::Stable, "766.3.0").await?;
        install(&store, Channel::Stable, "835.9.0").await?;

        let removed = store.prune(Channel::Stable).await?;
        assert_eq!(removed, vec![Version::new(766, 3, 0)]);
        assert_eq!(
            store.local_versions(Channel::Stable).await?,
            vec![Version::new(835, 9, 0)]
        );

        assert!(!store.remove(Channel::Stable, &Version::new(1, 0, 0)).await?);
        Ok(())
    }
}
