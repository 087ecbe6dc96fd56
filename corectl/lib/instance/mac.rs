use sha2::{Digest, Sha256};
use uuid::Uuid;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Derives the MAC address of the guest's primary interface from its UUID.
///
/// This is the address handed to the hypervisor for the NAT'ed interface, so the same UUID
/// always boots with the same address and the host's DHCP service hands a re-launched
/// instance its previous lease.
pub fn mac_from_uuid(uuid: &Uuid) -> String {
    interface_mac(uuid, 0)
}

/// Derives the MAC address of the guest's interface in slot `index`.
///
/// The result is a locally administered unicast address, distinct per slot.
pub fn interface_mac(uuid: &Uuid, index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(uuid.as_bytes());
    hasher.update(index.to_be_bytes());
    let digest = hasher.finalize();

    let mut octets = [0u8; 6];
    octets.copy_from_slice(&digest[..6]);
    octets[0] = (octets[0] | 0x02) & 0xfe;

    octets
        .iter()
        .map(|octet| format!("{octet:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
