use std::path::{Path, PathBuf};

use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::{
    config::{Context, DEFAULT_MEMORY_MIB, DEFAULT_NUM_VCPUS, LATEST_VERSION, MAX_MEMORY_MIB, MIN_MEMORY_MIB},
    image::Channel,
    instance::{NetworkInterface, StorageDevice, StorageKind},
    utils, CorectlError, CorectlResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The UUID value asking for a freshly generated one.
pub const RANDOM_UUID: &str = "random";

/// Extension a CD-ROM image must carry.
pub const CDROM_EXTENSION: &str = "iso";

/// Extension a disk image must carry.
pub const VOLUME_EXTENSION: &str = "img";

/// The prefix of every tap device name.
const TAP_PREFIX: &str = "tap";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Everything the user asked for when booting an instance, before validation.
#[derive(Debug, Clone, TypedBuilder)]
pub struct LaunchRequest {
    /// The image channel. Unknown channels fall back to the default one.
    #[builder(default = Channel::default().to_string(), setter(into))]
    pub channel: String,

    /// The image version, or `latest`.
    #[builder(default = LATEST_VERSION.to_string(), setter(into))]
    pub version: String,

    /// The instance UUID, `random` or nothing for a fresh one.
    #[builder(default, setter(strip_option, into))]
    pub uuid: Option<String>,

    /// The instance name. Defaults to the UUID.
    #[builder(default, setter(strip_option, into))]
    pub name: Option<String>,

    /// The RAM in MiB.
    #[builder(default = DEFAULT_MEMORY_MIB)]
    pub memory: u32,

    /// The number of vCPUs.
    #[builder(default = DEFAULT_NUM_VCPUS)]
    pub cpus: u8,

    /// A cloud-config URL or local file.
    #[builder(default, setter(strip_option, into))]
    pub cloud_config: Option<String>,

    /// A public key to authorize in the guest.
    #[builder(default, setter(strip_option, into))]
    pub ssh_key: Option<String>,

    /// A disk image holding the root filesystem.
    #[builder(default, setter(strip_option, into))]
    pub root: Option<String>,

    /// An ISO image to attach as CD-ROM.
    #[builder(default, setter(strip_option, into))]
    pub cdrom: Option<String>,

    /// Further disk images. Each value may be a comma separated list.
    #[builder(default)]
    pub volumes: Vec<String>,

    /// Tap devices to attach after the NAT'ed interface.
    #[builder(default)]
    pub taps: Vec<String>,

    /// Whether to run in the background.
    #[builder(default)]
    pub detached: bool,

    /// Whether `latest` should prefer the newest local image over asking upstream.
    #[builder(default)]
    pub prefer_local: bool,

    /// Extra arguments for the hypervisor.
    #[builder(default, setter(strip_option, into))]
    pub extra: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Resolves the requested UUID, generating one when asked to or when the value is malformed.
pub fn resolve_uuid(requested: Option<&str>) -> Uuid {
    match requested.map(str::trim) {
        None | Some("") => Uuid::new_v4(),
        Some(value) if value.eq_ignore_ascii_case(RANDOM_UUID) => Uuid::new_v4(),
        Some(value) => Uuid::parse_str(value).unwrap_or_else(|e| {
            let uuid = Uuid::new_v4();
            tracing::warn!("`{value}` is not a valid UUID ({e}), using {uuid} instead");
            uuid
        }),
    }
}

/// Resolves the instance name, which defaults to the UUID.
///
/// Names end up as path segments of the metadata service, so only ASCII letters, digits,
/// `.`, `_` and `-` are accepted.
pub fn resolve_name(requested: Option<&str>, uuid: &Uuid) -> CorectlResult<String> {
    let name = match requested.map(str::trim) {
        None | Some("") => return Ok(uuid.to_string()),
        Some(name) => name,
    };

    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !valid || name.starts_with('.') {
        return Err(CorectlError::UserInput(format!(
            "`{name}` is not a valid instance name, use letters, digits, `.`, `_` and `-`"
        )));
    }

    Ok(name.to_string())
}

/// Clamps the requested RAM into the range the hypervisor supports.
pub fn clamp_memory(requested: u32) -> u32 {
    if requested < MIN_MEMORY_MIB {
        tracing::warn!("{requested}MB of RAM is too little, using {MIN_MEMORY_MIB}MB");
        MIN_MEMORY_MIB
    } else if requested > MAX_MEMORY_MIB {
        tracing::warn!("{requested}MB of RAM is more than supported, using {MAX_MEMORY_MIB}MB");
        MAX_MEMORY_MIB
    } else {
        requested
    }
}

/// Splits volume flags into single paths. Values may be comma separated and wrapped in `[]`.
pub fn split_volumes(values: &[String]) -> Vec<String> {
    values
        .iter()
        .flat_map(|value| value.trim_matches(|c| c == '[' || c == ']').split(','))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

/// Validates a user supplied image file and turns it into a storage device.
pub fn storage_device(
    ctx: &Context,
    value: &str,
    kind: StorageKind,
    slot: u8,
) -> CorectlResult<StorageDevice> {
    let extension = match kind {
        StorageKind::Cdrom => CDROM_EXTENSION,
        StorageKind::Hdd => VOLUME_EXTENSION,
    };

    let path = ctx.absolute(value);
    if !utils::is_file_with_extension(&path, extension) {
        return Err(CorectlError::UserInput(format!(
            "{} must be an existing `.{extension}` file",
            path.display()
        )));
    }

    Ok(StorageDevice { kind, slot, path })
}

/// Validates the root disk and the volumes, root first, and assigns their slots.
pub fn hard_drives(
    ctx: &Context,
    root: Option<&str>,
    volumes: &[String],
) -> CorectlResult<Vec<StorageDevice>> {
    let mut drives: Vec<StorageDevice> = Vec::new();
    for value in root.map(str::to_string).into_iter().chain(split_volumes(volumes)) {
        let slot = u8::try_from(drives.len())
            .map_err(|_| CorectlError::UserInput("too many volumes".to_string()))?;
        let drive = storage_device(ctx, &value, StorageKind::Hdd, slot)?;
        if drives.iter().any(|other| other.path == drive.path) {
            return Err(CorectlError::UserInput(format!(
                "{} can't be the base of multiple volumes",
                drive.path.display()
            )));
        }
        drives.push(drive);
    }
    Ok(drives)
}

/// Builds the network interfaces: a NAT'ed one followed by the requested tap devices.
///
/// Tap devices must live in the context's device directory.
pub fn interfaces(ctx: &Context, taps: &[String]) -> CorectlResult<Vec<NetworkInterface>> {
    let mut interfaces = vec![NetworkInterface::raw()];
    for tap in taps {
        let path = validate_tap(ctx.get_device_dir(), Path::new(tap.trim()))?;
        if interfaces.iter().any(|other| other.path.as_ref() == Some(&path)) {
            return Err(CorectlError::UserInput(format!(
                "{} requested more than once",
                path.display()
            )));
        }
        interfaces.push(NetworkInterface::tap(path));
    }
    Ok(interfaces)
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn validate_tap(device_dir: &Path, path: &Path) -> CorectlResult<PathBuf> {
    let in_dev = path.parent() == Some(device_dir);
    let is_tap = path
        .file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with(TAP_PREFIX));

    if !in_dev || !is_tap {
        return Err(CorectlError::UserInput(format!(
            "{} is not a tap device, expected {}/{TAP_PREFIX}N",
            path.display(),
            device_dir.display()
        )));
    }

    if !path.exists() {
        return Err(CorectlError::UserInput(format!(
            "{} does not exist",
            path.display()
        )));
    }

    Ok(path.to_path_buf())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn context(pwd: &Path) -> Context {
        Context::builder()
            .home_dir(pwd.join(".coreos"))
            .pwd(pwd)
            .supervisor_exe("/usr/local/bin/corectl")
            .build()
    }

    #[test]
    fn test_resolve_uuid() -> anyhow::Result<()> {
        let given = "2f3c5e6a-8b7d-4e1f-9a0b-1c2d3e4f5a6b";
        assert_eq!(resolve_uuid(Some(given)), Uuid::parse_str(given)?);

        let random = resolve_uuid(Some("random"));
        assert_ne!(random, resolve_uuid(Some("random")));

        let malformed = resolve_uuid(Some("not-a-uuid"));
        assert_eq!(malformed.get_version_num(), 4);
        Ok(())
    }

    #[test]
    fn test_resolve_name() -> anyhow::Result<()> {
        let uuid = Uuid::new_v4();
        assert_eq!(resolve_name(None, &uuid)?, uuid.to_string());
        assert_eq!(resolve_name(Some("core-01.dev_x"), &uuid)?, "core-01.dev_x");

        for bad in ["a/b", "with space", "..", "naïve"] {
            assert!(matches!(
                resolve_name(Some(bad), &uuid),
                Err(CorectlError::UserInput(_))
            ));
        }
        Ok(())
    }

    #[test]
    fn test_clamp_memory() {
        assert_eq!(clamp_memory(512), MIN_MEMORY_MIB);
        assert_eq!(clamp_memory(2048), 2048);
        assert_eq!(clamp_memory(8192), MAX_MEMORY_MIB);
    }

    #[test]
    fn test_split_volumes() {
        let values = vec!["[a.img,b.img]".to_string(), "c.img".to_string(), ",".to_string()];
        assert_eq!(split_volumes(&values), ["a.img", "b.img", "c.img"]);
    }

    #[test]
    fn test_hard_drives_put_root_first() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        for name in ["root.img", "data.img", "tools.iso"] {
            std::fs::write(dir.path().join(name), b"")?;
        }
        let ctx = context(dir.path());

        let drives = hard_drives(&ctx, Some("root.img"), &["data.img".to_string()])?;
        assert_eq!(drives.len(), 2);
        assert_eq!(drives[0].path, dir.path().join("root.img"));
        assert_eq!(drives[1].slot, 1);

        assert!(matches!(
            hard_drives(&ctx, Some("root.img"), &["root.img".to_string()]),
            Err(CorectlError::UserInput(message)) if message.contains("multiple volumes")
        ));
        assert!(matches!(
            hard_drives(&ctx, None, &["tools.iso".to_string()]),
            Err(CorectlError::UserInput(_))
        ));
        assert!(matches!(
            hard_drives(&ctx, None, &["missing.img".to_string()]),
            Err(CorectlError::UserInput(_))
        ));

        let cdrom = storage_device(&ctx, "tools.iso", StorageKind::Cdrom, 0)?;
        assert_eq!(cdrom.path, dir.path().join("tools.iso"));
        Ok(())
    }

    #[test]
    fn test_interfaces_reject_non_tap_devices() {
        let ctx = context(Path::new("/work"));
        assert_eq!(interfaces(&ctx, &[]).ok(), Some(vec![NetworkInterface::raw()]));

        for bad in ["/dev/null", "/tmp/tap0", "/dev/tap-does-not-exist"] {
            assert!(matches!(
                interfaces(&ctx, &[bad.to_string()]),
                Err(CorectlError::UserInput(_))
            ));
        }
    }

    #[test]
    fn test_interfaces_in_device_dir() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("tap0"), b"")?;
        let ctx = Context::builder()
            .home_dir(dir.path().join(".coreos"))
            .pwd(dir.path())
            .supervisor_exe("/usr/local/bin/corectl")
            .device_dir(dir.path())
            .build();

        let tap = dir.path().join("tap0").display().to_string();
        assert_eq!(
            interfaces(&ctx, &[format!(" {tap} ")])?,
            [NetworkInterface::raw(), NetworkInterface::tap(dir.path().join("tap0"))]
        );
        assert!(matches!(
            interfaces(&ctx, &[tap.clone(), tap]),
            Err(CorectlError::UserInput(_))
        ));
        assert!(matches!(
            interfaces(&ctx, &["/dev/tap0".to_string()]),
            Err(CorectlError::UserInput(_))
        ));
        Ok(())
    }
}
