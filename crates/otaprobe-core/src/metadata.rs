//! OTA package metadata.
//!
//! Every Android OTA zip carries `META-INF/com/android/metadata`, a list of
//! `key=value` lines naming the build the package installs (`post-build`)
//! and, for incremental packages, the build it applies to (`pre-build`).
//!
//! Only the head of the package is fetched. The entry is located by walking
//! local file headers from the start of the archive, so it must lie within
//! that window.

use crate::error::MetadataError;
use crate::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};
use tracing::trace;

/// Path of the metadata entry inside an OTA package
pub const METADATA_ENTRY: &str = "META-INF/com/android/metadata";

/// Bytes fetched from the start of a package by default
pub const DEFAULT_WINDOW_BYTES: u64 = 8 * 1024 * 1024;

/// Whether and how far to read into offered packages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Fetch metadata for every offered package
    pub enabled: bool,
    /// Bytes read from the start of the package
    pub window_bytes: u64,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window_bytes: DEFAULT_WINDOW_BYTES,
        }
    }
}

/// Parsed `META-INF/com/android/metadata`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OtaMetadata {
    /// `post-build`: fingerprint(s) the package installs, `|`-separated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_build: Option<String>,
    /// `post-build-incremental`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_build_incremental: Option<String>,
    /// `post-security-patch-level`, e.g. `2024-11-05`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_security_patch_level: Option<String>,
    /// `post-sdk-level`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_sdk_level: Option<u32>,
    /// `post-timestamp`, seconds since the epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_timestamp: Option<u64>,
    /// `pre-build`: fingerprint(s) an incremental package applies to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_build: Option<String>,
}

impl OtaMetadata {
    /// Parses `key=value` lines; unknown keys and empty values are ignored
    pub fn parse(text: &str) -> Self {
        let mut meta = Self::default();
        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key.trim() {
                "post-build" => meta.post_build = Some(value.to_string()),
                "post-build-incremental" => meta.post_build_incremental = Some(value.to_string()),
                "post-security-patch-level" => {
                    meta.post_security_patch_level = Some(value.to_string())
                }
                "post-sdk-level" => meta.post_sdk_level = value.parse().ok(),
                "post-timestamp" => meta.post_timestamp = value.parse().ok(),
                "pre-build" => meta.pre_build = Some(value.to_string()),
                _ => {}
            }
        }
        meta
    }

    /// Finds and parses the metadata entry in the leading bytes of a package.
    ///
    /// Returns `Ok(None)` when the window ends before the entry shows up.
    pub fn from_archive_head(head: &[u8]) -> Result<Option<Self>, MetadataError> {
        let mut reader = Cursor::new(head);
        let mut entries = 0usize;

        loop {
            let mut entry = match zip::read::read_zipfile_from_stream(&mut reader) {
                Ok(Some(entry)) => entry,
                Ok(None) => return Ok(None),
                Err(e) if entries == 0 => return Err(MetadataError::Archive(e.to_string())),
                Err(e) => {
                    trace!("Stopped after {} entries: {}", entries, e);
                    return Ok(None);
                }
            };
            entries += 1;

            if entry.name() == METADATA_ENTRY {
                let mut text = String::new();
                entry
                    .read_to_string(&mut text)
                    .map_err(|e| MetadataError::Archive(format!("{METADATA_ENTRY}: {e}")))?;
                return Ok(Some(Self::parse(&text)));
            }
            trace!("Skipping package entry {}", entry.name());
        }
    }

    /// First parseable `post-build` fingerprint
    pub fn target(&self) -> Option<Fingerprint> {
        self.post_build
            .as_deref()?
            .split('|')
            .find_map(|raw| Fingerprint::parse(raw).ok())
    }

    /// Whether `fingerprint` is one of the `pre-build` fingerprints.
    ///
    /// `None` for full packages, which carry no `pre-build`.
    pub fn applies_to(&self, fingerprint: &Fingerprint) -> Option<bool> {
        let pre_build = self.pre_build.as_deref()?;
        Some(
            pre_build
                .split('|')
                .any(|raw| raw.trim() == fingerprint.as_str()),
        )
    }
}
