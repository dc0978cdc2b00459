//! Turns decoded checkin settings into an OTA package.

use crate::error::ResolutionError;
use crate::fingerprint::Fingerprint;
use crate::metadata::OtaMetadata;
use crate::response::DecodedFields;
use crate::table::SettingKeys;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

/// Whether a package is a full image or a patch against one build
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PackageKind {
    /// Installs on any earlier build
    Full,
    /// Applies only on top of `source`
    Incremental {
        /// The build this patch expects
        source: Fingerprint,
    },
}

impl PackageKind {
    /// Returns true for incremental packages
    pub fn is_incremental(&self) -> bool {
        matches!(self, PackageKind::Incremental { .. })
    }

    /// `"full"` or `"incremental"`
    pub fn name(&self) -> &'static str {
        match self {
            PackageKind::Full => "full",
            PackageKind::Incremental { .. } => "incremental",
        }
    }
}

/// An update offered by the checkin server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OtaPackage {
    url: String,
    size: Option<u64>,
    checksum: Option<String>,
    kind: PackageKind,
    target: Option<Fingerprint>,
    title: Option<String>,
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<OtaMetadata>,
}

impl OtaPackage {
    /// Download URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Size in bytes, when the server reported a readable one
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Package checksum as reported
    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    /// Full or incremental
    pub fn kind(&self) -> &PackageKind {
        &self.kind
    }

    /// Source build for incremental packages
    pub fn source(&self) -> Option<&Fingerprint> {
        match &self.kind {
            PackageKind::Incremental { source } => Some(source),
            PackageKind::Full => None,
        }
    }

    /// Build the package installs, when announced
    pub fn target(&self) -> Option<&Fingerprint> {
        self.target.as_ref()
    }

    /// Update title
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Changelog with markup removed
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Metadata read from the package itself, when it was fetched
    pub fn metadata(&self) -> Option<&OtaMetadata> {
        self.metadata.as_ref()
    }

    /// Folds in metadata read from the package.
    ///
    /// A `pre-build` marks the package incremental and must name `submitted`.
    /// `post-build` fills the target unless the server already announced one.
    pub fn apply_metadata(
        &mut self,
        metadata: OtaMetadata,
        submitted: &Fingerprint,
    ) -> Result<(), ResolutionError> {
        match metadata.applies_to(submitted) {
            Some(true) => {
                self.kind = PackageKind::Incremental {
                    source: submitted.clone(),
                }
            }
            Some(false) => {
                return Err(ResolutionError::InconsistentMetadata {
                    expected: submitted.to_string(),
                    found: metadata.pre_build.unwrap_or_default(),
                })
            }
            None => {}
        }

        if self.target.is_none() {
            self.target = metadata.target();
        }
        self.metadata = Some(metadata);
        Ok(())
    }

    /// Whether installing moves `current` to a different major Android version.
    ///
    /// `None` when either side has no parseable major version or the target is unknown.
    pub fn crosses_major_version(&self, current: &Fingerprint) -> Option<bool> {
        let target = self.target.as_ref()?.major_version()?;
        Some(target != current.major_version()?)
    }
}

/// Outcome of a probe that reached the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "package", rename_all = "snake_case")]
pub enum Resolution {
    /// The server offered a package
    Update(OtaPackage),
    /// The server offered nothing for this build
    NoUpdateAvailable,
}

impl Resolution {
    /// Returns true if a package was offered
    pub fn is_update(&self) -> bool {
        matches!(self, Resolution::Update(_))
    }

    /// The offered package, if any
    pub fn package(&self) -> Option<&OtaPackage> {
        match self {
            Resolution::Update(pkg) => Some(pkg),
            Resolution::NoUpdateAvailable => None,
        }
    }

    /// Takes the offered package, if any
    pub fn into_package(self) -> Option<OtaPackage> {
        match self {
            Resolution::Update(pkg) => Some(pkg),
            Resolution::NoUpdateAvailable => None,
        }
    }
}

/// Maps settings keys to package metadata
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    keys: SettingKeys,
}

impl Resolver {
    /// Creates a resolver for the given settings keys
    pub fn new(keys: SettingKeys) -> Self {
        Self { keys }
    }

    /// Resolves the decoded response for the build that was submitted
    pub fn resolve(
        &self,
        decoded: &DecodedFields,
        submitted: &Fingerprint,
    ) -> Result<Resolution, ResolutionError> {
        let Some(url) = self.find_url(decoded) else {
            debug!("No update offered for {}", submitted);
            return Ok(Resolution::NoUpdateAvailable);
        };

        let kind = match self.value(decoded, &self.keys.source_fingerprint) {
            None => PackageKind::Full,
            Some(raw) => match Fingerprint::parse(raw) {
                Ok(source) if source == *submitted => PackageKind::Incremental { source },
                _ => {
                    return Err(ResolutionError::InconsistentMetadata {
                        expected: submitted.to_string(),
                        found: raw.to_string(),
                    })
                }
            },
        };

        let target = self
            .value(decoded, &self.keys.target_fingerprint)
            .and_then(|raw| match Fingerprint::parse(raw) {
                Ok(fp) => Some(fp),
                Err(e) => {
                    debug!("Ignoring unparseable target fingerprint: {}", e);
                    None
                }
            });

        let size = self.value(decoded, &self.keys.size).and_then(|raw| {
            let parsed = parse_size(raw);
            if parsed.is_none() {
                debug!("Ignoring unparseable package size '{}'", raw);
            }
            parsed
        });

        let package = OtaPackage {
            url: url.to_string(),
            size,
            checksum: self.value(decoded, &self.keys.checksum).map(str::to_string),
            kind,
            target,
            title: self.value(decoded, &self.keys.title).map(str::to_string),
            description: self
                .value(decoded, &self.keys.description)
                .map(clean_description)
                .filter(|d| !d.is_empty()),
            metadata: None,
        };

        debug!(
            "Resolved {} package for {}: {}",
            package.kind.name(),
            submitted,
            package.url
        );
        Ok(Resolution::Update(package))
    }

    /// The configured URL key wins; otherwise any value pointing at the OTA host
    fn find_url<'a>(&self, decoded: &'a DecodedFields) -> Option<&'a str> {
        decoded
            .settings
            .iter()
            .filter(|s| {
                s.name == self.keys.url
                    || (!self.keys.ota_url_prefix.is_empty()
                        && s.value.contains(&self.keys.ota_url_prefix))
            })
            .map(|s| s.value.trim())
            .find(|url| !url.is_empty())
    }

    /// Trimmed, non-empty value of `key`
    fn value<'a>(&self, decoded: &'a DecodedFields, key: &str) -> Option<&'a str> {
        decoded.get(key).map(str::trim).filter(|v| !v.is_empty())
    }
}

static SIZE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*([0-9]+(?:\.[0-9]+)?)\s*(B|KB|MB|GB|TB|KiB|MiB|GiB|TiB)?\s*$").unwrap()
});

static LINE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

// Parenthesized links, including an unterminated trailing one
static URL_PAREN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\(https?://\S+\)?").unwrap());

/// Parses a byte count or a human-readable size such as `1.2 GB` (binary multiples)
pub fn parse_size(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if let Ok(bytes) = trimmed.parse::<u64>() {
        return Some(bytes);
    }

    let caps = SIZE_PATTERN.captures(trimmed)?;
    let number: f64 = caps[1].parse().ok()?;
    let exponent = match caps.get(2).map(|m| m.as_str().to_ascii_uppercase()) {
        None => 0,
        Some(unit) => match unit.trim_end_matches('B').trim_end_matches('I') {
            "" => 0,
            "K" => 1,
            "M" => 2,
            "G" => 3,
            "T" => 4,
            _ => return None,
        },
    };

    let bytes = (number * 1024f64.powi(exponent)).round();
    (bytes.is_finite() && bytes <= u64::MAX as f64).then_some(bytes as u64)
}

/// Strips changelog markup: source newlines are dropped, `<br>` becomes a
/// newline, other tags and parenthesized links are removed
pub fn clean_description(raw: &str) -> String {
    let text = raw.replace('\n', "");
    let text = LINE_BREAK.replace_all(&text, "\n");
    let text = HTML_TAG.replace_all(&text, "");
    let text = URL_PAREN.replace_all(&text, "");
    text.trim().to_string()
}
