//! The provisioning hooks injected into every pulled initramfs.
//!
//! CoreOS runs `usr/share/oem/cloud-config.yml` early on every boot. The hook reads the
//! metadata endpoint off the kernel command line and pulls the instance's ssh key, hostname
//! and cloud-config from it.

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Placeholder replaced with the image version in [`OEM_RELEASE`].
pub const VERSION_PLACEHOLDER: &str = "@@version@@";

/// Directories created ahead of the OEM files, parents first.
pub const OEM_DIRS: [&str; 4] = ["usr", "usr/share", "usr/share/oem", "usr/share/oem/bin"];

/// Where the bootstrap cloud-config lands.
pub const OEM_CLOUD_CONFIG_PATH: &str = "usr/share/oem/cloud-config.yml";

/// Where the OEM release description lands.
pub const OEM_RELEASE_PATH: &str = "usr/share/oem/xhyve.yml";

/// Where the environment setup script lands.
pub const OEM_SETUP_ENV_PATH: &str = "usr/share/oem/bin/coreos-setup-environment";

/// Mode of OEM directories and executables.
pub const OEM_EXEC_MODE: u32 = 0o755;

/// Mode of OEM data files.
pub const OEM_DATA_MODE: u32 = 0o644;

/// The cloud-config CoreOS applies from the OEM partition on boot.
pub const OEM_CLOUD_CONFIG: &str = r#"#cloud-config
coreos:
  units:
    - name: corectl-bootstrap.service
      command: start
      runtime: true
      content: |
        [Unit]
        Description=Bootstrap from the corectl metadata service
        Wants=network-online.target
        After=network-online.target

        [Service]
        Type=oneshot
        RemainAfterExit=yes
        ExecStart=/usr/share/oem/bin/coreos-setup-environment /etc/environment
    - name: user-cloudinit-proc-cmdline.service
      command: start
      runtime: true
"#;

/// The OEM release description, templated with the image version.
pub const OEM_RELEASE: &str = r#"#cloud-config
coreos:
  oem:
    id: xhyve
    name: CoreOS on xhyve
    version-id: @@version@@
    home-url: https://github.com/appcypher/corectl
    bug-report-url: https://github.com/appcypher/corectl/issues
"#;

/// Fetches bootstrap data from the metadata endpoint named on the kernel command line.
pub const OEM_SETUP_ENV: &str = r#"#!/bin/bash -e

ENV="${1:-/etc/environment}"

cmdline_value() {
    tr ' ' '\n' < /proc/cmdline | sed -n "s/^$1=//p" | tr -d '"' | head -n 1
}

ENDPOINT="$(cmdline_value endpoint)"
if [ -z "${ENDPOINT}" ]; then
    echo "no metadata endpoint on the kernel command line" >&2
    exit 0
fi

fetch() {
    curl --silent --fail --retry 10 --retry-delay 1 "${ENDPOINT}/$1"
}

mkdir -p /home/core/.ssh
if KEY="$(fetch sshKey)"; then
    echo "${KEY}" > /home/core/.ssh/authorized_keys.d/corectl 2>/dev/null || {
        mkdir -p /home/core/.ssh/authorized_keys.d
        echo "${KEY}" > /home/core/.ssh/authorized_keys.d/corectl
    }
    update-ssh-keys -u core
fi

if NAME="$(fetch hostname)"; then
    hostnamectl set-hostname "${NAME}"
fi

IP="$(ip -4 -o addr show dev eth0 | awk '{ split($4, a, "/"); print a[1] }')"
sed -i -e '/^COREOS_PUBLIC_IPV4=/d' -e '/^COREOS_PRIVATE_IPV4=/d' "${ENV}" 2>/dev/null || true
echo "COREOS_PUBLIC_IPV4=${IP}" >> "${ENV}"
echo "COREOS_PRIVATE_IPV4=${IP}" >> "${ENV}"
"#;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Renders the OEM release description for `version`.
pub fn release_for(version: &str) -> String {
    OEM_RELEASE.replace(VERSION_PLACEHOLDER, version)
}
