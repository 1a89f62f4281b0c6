// Copyright (c) 2024 SenseLink Contributors
// SPDX-License-Identifier: MPL-2.0

//! Random MAC address and device-ID generation for spoofed plug identities.

use rand::Rng;

/// Vendor prefix used when a plug config doesn't pin a MAC: `53:75:31`
/// ("Su1" — the original project's nod to itself), carried over so existing
/// SenseLink configs and docs referencing this OUI keep working.
pub const DEFAULT_OUI: [u8; 3] = [0x53, 0x75, 0x31];

/// Generates a MAC address, formatted lowercase and colon-separated.
///
/// Without an OUI, the address is locally-administered and unicast (bit 0 of
/// the first byte clear, bit 1 set). With an OUI, the first `oui.len()`
/// bytes are pinned and the rest are random.
pub fn generate_mac(oui: Option<&[u8]>) -> String {
    let mut rng = rand::thread_rng();
    let mut bytes = [0u8; 6];
    rng.fill(&mut bytes);

    match oui {
        Some(oui) => {
            let n = oui.len().min(6);
            bytes[..n].copy_from_slice(&oui[..n]);
        }
        None => {
            bytes[0] &= !1; // unicast
            bytes[0] |= 1 << 1; // locally administered
        }
    }

    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Generates a 20-byte device ID, returned as lowercase hex.
pub fn generate_device_id() -> String {
    let mut rng = rand::thread_rng();
    let mut bytes = [0u8; 20];
    rng.fill(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_without_oui_is_unicast_and_locally_administered() {
        let mac = generate_mac(None);
        let first_byte = u8::from_str_radix(&mac[0..2], 16).unwrap();
        assert_eq!(first_byte & 1, 0, "unicast bit must be clear");
        assert_eq!(first_byte & 0b10, 0b10, "locally-administered bit must be set");
    }

    #[test]
    fn mac_format_is_lowercase_colon_separated() {
        let mac = generate_mac(None);
        assert_eq!(mac.len(), 17);
        assert!(mac.chars().all(|c| c.is_ascii_hexdigit() || c == ':'));
        assert_eq!(mac, mac.to_lowercase());
    }

    #[test]
    fn mac_with_oui_pins_prefix() {
        let mac = generate_mac(Some(&DEFAULT_OUI));
        assert!(mac.starts_with("53:75:31:"));
    }

    #[test]
    fn device_id_is_40_hex_chars() {
        let id = generate_device_id();
        assert_eq!(id.len(), 40);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_macs_are_not_all_identical() {
        let a = generate_mac(None);
        let b = generate_mac(None);
        assert_ne!(a, b, "two random MACs matching would indicate a broken RNG");
    }
}
