//! Android build fingerprints.
//!
//! A fingerprint is the canonical build identifier reported as
//! `ro.build.fingerprint`:
//!
//! ```text
//! brand/product/device:release/build_id/incremental:type/tags
//! ```
//!
//! ```
//! use otaprobe_core::Fingerprint;
//!
//! let fp: Fingerprint = "google/husky/husky:14/AP1A.240305.019/11445699:user/release-keys".parse()?;
//! assert_eq!(fp.device(), "husky");
//! assert_eq!(fp.sdk_level(), Some(34));
//! # Ok::<(), otaprobe_core::error::ParseError>(())
//! ```

use crate::error::ParseError;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Build type and tags appended to fingerprints assembled from config parts
pub const DEFAULT_VARIANT: &str = "user/release-keys";

/// A parsed, validated build fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    raw: String,
    brand: String,
    product: String,
    device: String,
    release: String,
    build_id: String,
    incremental: String,
    build_type: String,
    tags: String,
}

impl Fingerprint {
    /// Parses and validates a raw fingerprint string
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ParseError::malformed(raw, "empty input"));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(ParseError::malformed(raw, "contains whitespace"));
        }

        let sections: Vec<&str> = raw.split(':').collect();
        let [identity, build, variant] = sections.as_slice() else {
            return Err(ParseError::malformed(raw, "expected three ':'-separated sections"));
        };

        let [brand, product, device] = split_exact::<3>(identity)
            .ok_or_else(|| ParseError::malformed(raw, "expected brand/product/device"))?;
        let [release, build_id, incremental] = split_exact::<3>(build)
            .ok_or_else(|| ParseError::malformed(raw, "expected release/build_id/incremental"))?;
        let [build_type, tags] = split_exact::<2>(variant)
            .ok_or_else(|| ParseError::malformed(raw, "expected type/tags"))?;

        let segments = [
            brand,
            product,
            device,
            release,
            build_id,
            incremental,
            build_type,
            tags,
        ];
        if segments.iter().any(|s| s.is_empty()) {
            return Err(ParseError::malformed(raw, "empty segment"));
        }

        Ok(Self {
            raw: raw.to_string(),
            brand: brand.to_string(),
            product: product.to_string(),
            device: device.to_string(),
            release: release.to_string(),
            build_id: build_id.to_string(),
            incremental: incremental.to_string(),
            build_type: build_type.to_string(),
            tags: tags.to_string(),
        })
    }

    /// Assembles a `user/release-keys` fingerprint from its parts and validates it
    pub fn from_parts(
        brand: &str,
        product: &str,
        device: &str,
        release: &str,
        build_id: &str,
        incremental: &str,
    ) -> Result<Self, ParseError> {
        Self::parse(&format!(
            "{brand}/{product}/{device}:{release}/{build_id}/{incremental}:{DEFAULT_VARIANT}"
        ))
    }

    /// The full fingerprint string
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Brand (OEM) segment
    pub fn brand(&self) -> &str {
        &self.brand
    }

    /// Product segment
    pub fn product(&self) -> &str {
        &self.product
    }

    /// Device codename
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Android release version, e.g. `14` or `8.1.0`
    pub fn release(&self) -> &str {
        &self.release
    }

    /// Build id, e.g. `AP1A.240305.019`
    pub fn build_id(&self) -> &str {
        &self.build_id
    }

    /// Incremental build number
    pub fn incremental(&self) -> &str {
        &self.incremental
    }

    /// Build type, usually `user`
    pub fn build_type(&self) -> &str {
        &self.build_type
    }

    /// Signing tags, usually `release-keys`
    pub fn tags(&self) -> &str {
        &self.tags
    }

    /// Leading numeric component of the release version
    pub fn major_version(&self) -> Option<u32> {
        leading_number(&self.release)
    }

    /// API level for the release version, for releases since Lollipop
    pub fn sdk_level(&self) -> Option<u32> {
        let major = self.major_version()?;
        let minor = self
            .release
            .split('.')
            .nth(1)
            .and_then(leading_number)
            .unwrap_or(0);

        let level = match (major, minor) {
            (5, 0) => 21,
            (5, _) => 22,
            (6, _) => 23,
            (7, 0) => 24,
            (7, _) => 25,
            (8, 0) => 26,
            (8, _) => 27,
            (9, _) => 28,
            (10, _) => 29,
            (11, _) => 30,
            (12, 0) => 31,
            (12, _) => 32,
            (13, _) => 33,
            (14, _) => 34,
            (15, _) => 35,
            (16, _) => 36,
            _ => return None,
        };
        Some(level)
    }

    /// Region suffix of the product name, e.g. `OP` for `X6871-OP`
    pub fn region_code(&self) -> Option<String> {
        let (_, code) = self.product.rsplit_once('-')?;
        let code = code.trim().to_ascii_uppercase();
        (!code.is_empty()).then_some(code)
    }

    /// Human-readable region for well-known product suffixes
    pub fn region_name(&self) -> Option<&'static str> {
        match self.region_code()?.as_str() {
            "GL" | "OP" => Some("Global"),
            "RU" => Some("Russia"),
            "IN" => Some("India"),
            "EU" => Some("Europe"),
            "TR" => Some("Turkey"),
            _ => None,
        }
    }
}

fn split_exact<const N: usize>(section: &str) -> Option<[&str; N]> {
    let parts: Vec<&str> = section.split('/').collect();
    parts.try_into().ok()
}

fn leading_number(s: &str) -> Option<u32> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s[..end].parse().ok()
}

impl FromStr for Fingerprint {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = "brand/product/device:13/ID123/456:user/release-keys";

    #[test]
    fn test_parse_segments() {
        let fp = Fingerprint::parse(SAMPLE).unwrap();
        assert_eq!(fp.brand(), "brand");
        assert_eq!(fp.product(), "product");
        assert_eq!(fp.device(), "device");
        assert_eq!(fp.release(), "13");
        assert_eq!(fp.build_id(), "ID123");
        assert_eq!(fp.incremental(), "456");
        assert_eq!(fp.build_type(), "user");
        assert_eq!(fp.tags(), "release-keys");
        assert_eq!(fp.to_string(), SAMPLE);
    }

    #[test]
    fn test_rejects_malformed() {
        for input in [
            "not-a-fingerprint",
            "",
            "brand/product:13/ID123/456:user/release-keys",
            "brand/product/device:13/ID123:user/release-keys",
            "brand/product/device:13/ID123/456:user",
            "brand//device:13/ID123/456:user/release-keys",
            "brand/product/device:13/ID123/456:user/release-keys:extra",
            "brand/product/device:13/ID 123/456:user/release-keys",
        ] {
            let err = Fingerprint::parse(input).unwrap_err();
            assert!(
                matches!(err, ParseError::MalformedFingerprint { .. }),
                "{input} should be rejected"
            );
        }
    }

    #[test]
    fn test_surrounding_whitespace_is_trimmed() {
        let fp = Fingerprint::parse(&format!("  {SAMPLE}\n")).unwrap();
        assert_eq!(fp.as_str(), SAMPLE);
    }

    #[test]
    fn test_from_parts() {
        let fp = Fingerprint::from_parts("brand", "product", "device", "13", "ID123", "456").unwrap();
        assert_eq!(fp.as_str(), SAMPLE);
        assert!(Fingerprint::from_parts("brand", "", "device", "13", "ID123", "456").is_err());
    }

    #[test]
    fn test_versions() {
        let fp = Fingerprint::parse(SAMPLE).unwrap();
        assert_eq!(fp.major_version(), Some(13));
        assert_eq!(fp.sdk_level(), Some(33));

        let oreo = Fingerprint::parse("google/walleye/walleye:8.1.0/OPM1/4479802:user/release-keys").unwrap();
        assert_eq!(oreo.major_version(), Some(8));
        assert_eq!(oreo.sdk_level(), Some(27));

        for (release, level) in [
            ("10", 29),
            ("11", 30),
            ("12", 31),
            ("12.1", 32),
            ("14", 34),
            ("15", 35),
            ("16", 36),
        ] {
            let fp = Fingerprint::from_parts("b", "p", "d", release, "ID", "1").unwrap();
            assert_eq!(fp.sdk_level(), Some(level), "release {release}");
        }

        let preview = Fingerprint::parse("google/a/b:VanillaIceCream/X/1:user/release-keys").unwrap();
        assert_eq!(preview.major_version(), None);
        assert_eq!(preview.sdk_level(), None);
    }

    #[test]
    fn test_region() {
        let fp = Fingerprint::parse("TECNO/X6871-OP/TECNO-X6871:14/UP1A/250115:user/release-keys").unwrap();
        assert_eq!(fp.region_code().as_deref(), Some("OP"));
        assert_eq!(fp.region_name(), Some("Global"));

        let plain = Fingerprint::parse(SAMPLE).unwrap();
        assert_eq!(plain.region_code(), None);
    }
}
