use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use ctlutils::cpio;
use flate2::{read::MultiGzDecoder, write::GzEncoder, Compression};
use semver::Version;
use tempfile::NamedTempFile;

use crate::{CorectlError, CorectlResult};

use super::oem::{
    release_for, OEM_CLOUD_CONFIG, OEM_CLOUD_CONFIG_PATH, OEM_DATA_MODE, OEM_DIRS,
    OEM_EXEC_MODE, OEM_RELEASE_PATH, OEM_SETUP_ENV, OEM_SETUP_ENV_PATH,
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Injects the OEM provisioning hooks into the gzipped cpio initramfs at `path`.
///
/// The hooks are written first and the original entries copied after them. The result is
/// assembled in a temporary file beside `path` and renamed over it only once complete, so on
/// any failure `path` is left as it was.
pub async fn customize_initrd(path: &Path, version: &Version) -> CorectlResult<()> {
    let path = path.to_path_buf();
    let version = version.to_string();
    tokio::task::spawn_blocking(move || rewrite_initrd(&path, &version)).await?
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn rewrite_initrd(path: &Path, version: &str) -> CorectlResult<()> {
    let parent = path.parent().ok_or_else(|| {
        CorectlError::custom(anyhow::anyhow!("{} has no parent directory", path.display()))
    })?;

    let input = File::open(path)?;
    let mut reader = cpio::Reader::new(MultiGzDecoder::new(BufReader::new(input)));

    let output = NamedTempFile::new_in(parent)?;
    let encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
    let mut writer = cpio::Writer::new(encoder);

    let mtime = u32::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
    for dir in OEM_DIRS {
        writer.write_dir(dir, OEM_EXEC_MODE, mtime)?;
    }
    writer.write_file(
        OEM_CLOUD_CONFIG_PATH,
        OEM_DATA_MODE,
        mtime,
        OEM_CLOUD_CONFIG.as_bytes(),
    )?;
    writer.write_file(
        OEM_RELEASE_PATH,
        OEM_DATA_MODE,
        mtime,
        release_for(version).as_bytes(),
    )?;
    writer.write_file(
        OEM_SETUP_ENV_PATH,
        OEM_EXEC_MODE,
        mtime,
        OEM_SETUP_ENV.as_bytes(),
    )?;

    let copied = cpio::copy(&mut writer, &mut reader)?;

    let output = writer
        .finish()?
        .finish()?
        .into_inner()
        .map_err(|e| e.into_error())?;
    output.as_file().sync_all()?;
    output.persist(path).map_err(|e| CorectlError::Io(e.error))?;

    tracing::debug!("customized {} ({copied} original entries)", path.display());
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use ctlutils::cpio::Header;

    use super::*;

    fn gz_cpio(entries: &[(&str, Option<&[u8]>)]) -> anyhow::Result<Vec<u8>> {
        let mut writer = cpio::Writer::new(GzEncoder::new(Vec::new(), Compression::fast()));
        for (name, contents) in entries {
            match contents {
                Some(data) => writer.write_file(name, 0o644, 0, data)?,
                None => writer.write_dir(name, 0o755, 0)?,
            }
        }
        Ok(writer.finish()?.finish()?)
    }

    fn read_entries(bytes: &[u8]) -> anyhow::Result<Vec<(Header, Vec<u8>)>> {
        let mut reader = cpio::Reader::new(MultiGzDecoder::new(bytes));
        let mut entries = Vec::new();
        loop {
            let header = reader.next()?;
            if header.is_trailer() {
                break;
            }
            let mut data = Vec::new();
            reader.read_to_end(&mut data)?;
            entries.push((header, data));
        }
        Ok(entries)
    }

    #[test_log::test(tokio::test)]
    async fn test_customize_prepends_oem_hooks() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("coreos_production_pxe_image.cpio.gz");
        std::fs::write(
            &path,
            gz_cpio(&[
                (".", None),
                ("etc", None),
                ("etc/hostname", Some(b"localhost\n")),
            ])?,
        )?;

        customize_initrd(&path, &Version::new(1068, 0, 0)).await?;

        let entries = read_entries(&std::fs::read(&path)?)?;
        let names: Vec<_> = entries.iter().map(|(h, _)| h.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "usr",
                "usr/share",
                "usr/share/oem",
                "usr/share/oem/bin",
                OEM_CLOUD_CONFIG_PATH,
                OEM_RELEASE_PATH,
                OEM_SETUP_ENV_PATH,
                "etc",
                "etc/hostname",
            ]
        );

        let (release, contents) = &entries[5];
        assert_eq!(release.mode, OEM_DATA_MODE);
        let contents = String::from_utf8(contents.clone())?;
        assert!(contents.contains("version-id: 1068.0.0"));
        assert!(!contents.contains("@@version@@"));

        assert_eq!(entries[6].0.mode, OEM_EXEC_MODE);
        assert_eq!(entries[8].1, b"localhost\n");

        let leftovers = std::fs::read_dir(dir.path())?.count();
        assert_eq!(leftovers, 1);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_customize_failure_leaves_original_untouched() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("coreos_production_pxe_image.cpio.gz");

        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(b"this is not a cpio archive at all, not even close")?;
        let original = encoder.finish()?;
        std::fs::write(&path, &original)?;

        let result = customize_initrd(&path, &Version::new(1, 0, 0)).await;
        assert!(result.is_err());
        assert_eq!(std::fs::read(&path)?, original);
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);
        Ok(())
    }
}
