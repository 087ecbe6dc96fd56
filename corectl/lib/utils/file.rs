use std::path::Path;

use tokio::{fs, io::AsyncWriteExt};

use crate::{CorectlError, CorectlResult};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Replaces the contents of `path` with `contents` atomically.
///
/// The data is written to a temporary file next to `path`, synced, and renamed over it, so a
/// reader sees either the old file or the new one.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> CorectlResult<()> {
    let parent = path.parent().ok_or_else(|| {
        CorectlError::custom(anyhow::anyhow!("{} has no parent directory", path.display()))
    })?;

    let temp = tempfile::Builder::new()
        .prefix(".tmp-")
        .tempfile_in(parent)?;
    let (file, temp_path) = temp.into_parts();

    let mut file = fs::File::from_std(file);
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    temp_path
        .persist(path)
        .map_err(|e| CorectlError::Io(e.error))?;

    Ok(())
}

/// Returns whether `path` is an existing regular file ending in `.{extension}`.
pub fn is_file_with_extension(path: &Path, extension: &str) -> bool {
    path.extension().is_some_and(|ext| ext == extension) && path.is_file()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_atomic_replaces_and_leaves_no_temp_files() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.json");

        write_atomic(&path, b"first").await?;
        write_atomic(&path, b"second").await?;

        assert_eq!(fs::read(&path).await?, b"second");
        let mut entries = fs::read_dir(dir.path()).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name());
        }
        assert_eq!(names, vec!["config.json"]);
        Ok(())
    }

    #[test]
    fn test_is_file_with_extension() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let iso = dir.path().join("boot.iso");
        std::fs::write(&iso, "")?;

        assert!(is_file_with_extension(&iso, "iso"));
        assert!(!is_file_with_extension(&iso, "img"));
        assert!(!is_file_with_extension(&dir.path().join("missing.iso"), "iso"));
        Ok(())
    }
}
