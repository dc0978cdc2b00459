//! Synthetic device identity.
//!
//! The checkin server expects hardware identifiers in every request. They
//! are derived from the fingerprint hash rather than drawn at random, so the
//! same build always produces the same payload.

use crate::fingerprint::Fingerprint;

const DERIVE_CONTEXT: &str = "otaprobe 2024-06-01 synthetic checkin device identity";

/// Type allocation code prefix used for generated IMEIs
const IMEI_PREFIX: [u8; 2] = [3, 5];

const SERIAL_ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Hardware identifiers reported in a checkin request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// 15-digit IMEI with a valid Luhn check digit
    pub imei: String,
    /// 12-character alphanumeric serial number
    pub serial_number: String,
    /// Wi-Fi MAC address as 12 lowercase hex digits
    pub mac_addr: String,
}

impl DeviceIdentity {
    /// Derives a stable identity for the given build
    pub fn derive(fingerprint: &Fingerprint) -> Self {
        let seed = blake3::derive_key(DERIVE_CONTEXT, fingerprint.as_str().as_bytes());

        let mut digits: Vec<u8> = IMEI_PREFIX.to_vec();
        digits.extend(seed[..12].iter().map(|b| b % 10));
        digits.push(luhn_check_digit(&digits));
        let imei = digits.iter().map(|d| char::from(b'0' + d)).collect();

        let serial_number = seed[12..24]
            .iter()
            .map(|b| char::from(SERIAL_ALPHABET[usize::from(*b) % SERIAL_ALPHABET.len()]))
            .collect();

        let mut mac = [0u8; 6];
        mac.copy_from_slice(&seed[24..30]);
        // Unicast, locally administered
        mac[0] = (mac[0] & 0xFC) | 0x02;
        let mac_addr = mac.iter().map(|b| format!("{b:02x}")).collect();

        Self {
            imei,
            serial_number,
            mac_addr,
        }
    }
}

/// Computes the Luhn check digit for a sequence of decimal digits
fn luhn_check_digit(body: &[u8]) -> u8 {
    let sum: u32 = body
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            let d = u32::from(d);
            if i % 2 == 0 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    ((10 - sum % 10) % 10) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(raw: &str) -> Fingerprint {
        Fingerprint::parse(raw).unwrap()
    }

    #[test]
    fn test_luhn_known_imei() {
        // 49015420323751-8 is the textbook example
        let body = [4, 9, 0, 1, 5, 4, 2, 0, 3, 2, 3, 7, 5, 1];
        assert_eq!(luhn_check_digit(&body), 8);
    }

    #[test]
    fn test_identity_shape() {
        let id = DeviceIdentity::derive(&fp("brand/product/device:13/ID123/456:user/release-keys"));
        assert_eq!(id.imei.len(), 15);
        assert!(id.imei.starts_with("35"));
        assert!(id.imei.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(id.serial_number.len(), 12);
        assert!(id.serial_number.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(id.mac_addr.len(), 12);
    }

    #[test]
    fn test_identity_is_stable_per_build() {
        let a = fp("brand/product/device:13/ID123/456:user/release-keys");
        let b = fp("brand/product/device:13/ID123/457:user/release-keys");
        assert_eq!(DeviceIdentity::derive(&a), DeviceIdentity::derive(&a));
        assert_ne!(DeviceIdentity::derive(&a), DeviceIdentity::derive(&b));
    }

    #[test]
    fn test_generated_imei_passes_luhn() {
        let id = DeviceIdentity::derive(&fp("google/husky/husky:14/AP1A/1:user/release-keys"));
        let digits: Vec<u8> = id.imei.bytes().map(|b| b - b'0').collect();
        assert_eq!(luhn_check_digit(&digits[..14]), digits[14]);
    }
}
