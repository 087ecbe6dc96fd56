use std::path::Path;

use crate::instance::{interface_mac, CloudConfig, InstanceRecord, InterfaceKind};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Assembles the guest kernel command line.
///
/// `endpoint` is the URL of the instance's metadata service.
pub fn kernel_cmdline(record: &InstanceRecord, endpoint: &str) -> String {
    let mut params = vec![
        "earlyprintk=serial".to_string(),
        "console=ttyS0".to_string(),
        "coreos.autologin".to_string(),
        format!("uuid={}", record.get_uuid()),
    ];

    if let Some(key) = record.get_ssh_key() {
        params.push(format!("sshkey=\"{key}\""));
    }

    if let Some(root) = record.root_device() {
        params.push(format!("root={root}"));
    }

    params.push(format!("endpoint={endpoint}"));

    match record.get_cloud_config() {
        Some(CloudConfig::Local(_)) => params.push(format!("cloud-config-url={endpoint}/cloud-config")),
        Some(CloudConfig::Remote(url)) => params.push(format!("cloud-config-url={url}")),
        None => {}
    }

    params.join(" ")
}

/// Assembles the hypervisor arguments booting `record` off `kernel` and `initrd`.
///
/// Every network slot is given its MAC address explicitly, the first one the record's.
pub fn hypervisor_args(
    record: &InstanceRecord,
    kernel: &Path,
    initrd: &Path,
    cmdline: &str,
) -> Vec<String> {
    let mut args = vec![
        "-s".to_string(),
        "0:0,hostbridge".to_string(),
        "-l".to_string(),
        "com1,stdio".to_string(),
        "-s".to_string(),
        "31,lpc".to_string(),
        "-U".to_string(),
        record.get_uuid().to_string(),
        "-m".to_string(),
        format!("{}M", record.get_memory()),
        "-c".to_string(),
        record.get_cpus().to_string(),
        "-A".to_string(),
    ];

    if let Some(extra) = record.get_extra() {
        args.extend(extra.split_whitespace().map(str::to_string));
    }

    for (index, interface) in record.get_interfaces().iter().enumerate() {
        let mac = match index {
            0 => record.get_mac().clone(),
            _ => interface_mac(record.get_uuid(), index),
        };
        args.push("-s".to_string());
        args.push(match interface.kind {
            InterfaceKind::Raw => format!("2:{index},virtio-net,mac={mac}"),
            InterfaceKind::Tap => {
                format!("2:{index},virtio-tap,{},mac={mac}", interface.device_arg())
            }
        });
    }

    for cdrom in &record.get_storage().cdroms {
        args.push("-s".to_string());
        args.push(format!("3:{},ahci-cd,{}", cdrom.slot, cdrom.path.display()));
    }

    for disk in &record.get_storage().hard_drives {
        args.push("-s".to_string());
        args.push(format!("4:{},virtio-blk,{}", disk.slot, disk.path.display()));
    }

    args.push("-f".to_string());
    args.push(format!(
        "kexec,{},{},{cmdline}",
        kernel.display(),
        initrd.display()
    ));

    args
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use semver::Version;
    use uuid::Uuid;

    use crate::{
        image::Channel,
        instance::{NetworkInterface, Storage, StorageDevice, StorageKind},
    };

    use super::*;

    const UUID: &str = "2f3c5e6a-8b7d-4e1f-9a0b-1c2d3e4f5a6b";

    fn record() -> anyhow::Result<InstanceRecord> {
        Ok(InstanceRecord::builder()
            .name("web")
            .uuid(Uuid::parse_str(UUID)?)
            .mac("02:00:00:00:00:01")
            .channel(Channel::Stable)
            .version(Version::new(835, 9, 0))
            .cpus(2)
            .memory(2048)
            .interfaces(vec![NetworkInterface::raw(), NetworkInterface::tap("/dev/tap1")])
            .storage(Storage {
                cdroms: vec![StorageDevice {
                    kind: StorageKind::Cdrom,
                    slot: 0,
                    path: PathBuf::from("/vm/tools.iso"),
                }],
                hard_drives: vec![
                    StorageDevice {
                        kind: StorageKind::Hdd,
                        slot: 0,
                        path: PathBuf::from("/vm/root.img"),
                    },
                    StorageDevice {
                        kind: StorageKind::Hdd,
                        slot: 1,
                        path: PathBuf::from("/vm/data.img"),
                    },
                ],
            })
            .root(0)
            .ssh_key("ssh-rsa AAAAuser me@host".to_string())
            .cloud_config(CloudConfig::Local(PathBuf::from("/work/user-data")))
            .build())
    }

    #[test]
    fn test_kernel_cmdline() -> anyhow::Result<()> {
        let cmdline = kernel_cmdline(&record()?, "http://192.168.64.1:40123/web");
        assert_eq!(
            cmdline,
            format!(
                "earlyprintk=serial console=ttyS0 coreos.autologin uuid={UUID} \
                 sshkey=\"ssh-rsa AAAAuser me@host\" root=/dev/vda \
                 endpoint=http://192.168.64.1:40123/web \
                 cloud-config-url=http://192.168.64.1:40123/web/cloud-config"
            )
        );
        Ok(())
    }

    #[test]
    fn test_kernel_cmdline_minimal_and_remote() -> anyhow::Result<()> {
        let minimal = InstanceRecord::builder()
            .name("bare")
            .uuid(Uuid::parse_str(UUID)?)
            .mac("02:00:00:00:00:01")
            .channel(Channel::Alpha)
            .version(Version::new(1068, 0, 0))
            .build();
        assert_eq!(
            kernel_cmdline(&minimal, "http://h:1/bare"),
            format!("earlyprintk=serial console=ttyS0 coreos.autologin uuid={UUID} endpoint=http://h:1/bare")
        );

        let remote = InstanceRecord::builder()
            .name("remote")
            .uuid(Uuid::parse_str(UUID)?)
            .mac("02:00:00:00:00:01")
            .channel(Channel::Alpha)
            .version(Version::new(1068, 0, 0))
            .cloud_config(CloudConfig::Remote("https://example.com/cc".to_string()))
            .build();
        assert!(kernel_cmdline(&remote, "http://h:1/remote")
            .ends_with(" cloud-config-url=https://example.com/cc"));
        Ok(())
    }

    #[test]
    fn test_hypervisor_args() -> anyhow::Result<()> {
        let uuid = Uuid::parse_str(UUID)?;
        let tap_mac = format!("2:1,virtio-tap,tap1,mac={}", interface_mac(&uuid, 1));
        let args = hypervisor_args(
            &record()?,
            Path::new("/images/vmlinuz"),
            Path::new("/images/initrd.cpio.gz"),
            "console=ttyS0",
        );

        assert_eq!(
            args,
            [
                "-s", "0:0,hostbridge", "-l", "com1,stdio", "-s", "31,lpc", "-U", UUID, "-m",
                "2048M", "-c", "2", "-A", "-s", "2:0,virtio-net,mac=02:00:00:00:00:01", "-s",
                tap_mac.as_str(), "-s", "3:0,ahci-cd,/vm/tools.iso", "-s",
                "4:0,virtio-blk,/vm/root.img", "-s", "4:1,virtio-blk,/vm/data.img", "-f",
                "kexec,/images/vmlinuz,/images/initrd.cpio.gz,console=ttyS0",
            ]
        );
        Ok(())
    }

    #[test]
    fn test_hypervisor_args_carry_the_recorded_mac() -> anyhow::Result<()> {
        let uuid = Uuid::new_v4();
        let record = InstanceRecord::builder()
            .name("web")
            .uuid(uuid)
            .mac(crate::instance::mac_from_uuid(&uuid))
            .channel(Channel::Stable)
            .version(Version::new(835, 9, 0))
            .interfaces(vec![NetworkInterface::raw()])
            .build();

        let args = hypervisor_args(&record, Path::new("k"), Path::new("i"), "");
        let slot = args
            .iter()
            .find(|arg| arg.starts_with("2:0,"))
            .ok_or_else(|| anyhow::anyhow!("no network slot"))?;
        assert_eq!(*slot, format!("2:0,virtio-net,mac={}", record.get_mac()));
        Ok(())
    }
}
