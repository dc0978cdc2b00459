//! YAML device configs.
//!
//! A config names one device build:
//!
//! ```yaml
//! oem: TECNO
//! product: X6871-OP
//! device: TECNO-X6871
//! android_version: 14
//! build_tag: UP1A.231005.007
//! incremental: 241107V1234
//! model: TECNO X6871
//! ```
//!
//! An optional `variants:` list expands one file into several configs. Each
//! entry is merged over the top-level keys, so regional builds only need to
//! spell out what differs. An optional `checkin:` section overrides the
//! probe configuration for that device.

use anyhow::{bail, Context, Result};
use otaprobe_core::error::ParseError;
use otaprobe_core::{Fingerprint, ProbeConfig};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Keys a variant entry may use to name itself, in order of preference
const VARIANT_NAME_KEYS: [&str; 5] = ["variant", "name", "region", "label", "product"];

/// One device build to probe
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    #[serde(deserialize_with = "scalar_string")]
    pub oem: String,
    #[serde(deserialize_with = "scalar_string")]
    pub product: String,
    #[serde(deserialize_with = "scalar_string")]
    pub device: String,
    #[serde(deserialize_with = "scalar_string")]
    pub android_version: String,
    #[serde(deserialize_with = "scalar_string")]
    pub build_tag: String,
    #[serde(deserialize_with = "scalar_string")]
    pub incremental: String,
    #[serde(deserialize_with = "scalar_string")]
    pub model: String,

    /// Probe overrides for this device
    #[serde(default)]
    pub checkin: Option<ProbeConfig>,

    /// Variant name when the file declares `variants:`
    #[serde(skip)]
    pub variant: Option<String>,

    /// File this config was loaded from
    #[serde(skip)]
    pub source: PathBuf,
}

impl DeviceConfig {
    /// Loads every config a file declares, one per variant
    pub fn load(path: &Path) -> Result<Vec<Self>> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let mut configs = Self::from_yaml(&text)
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        for config in &mut configs {
            config.source = path.to_path_buf();
        }
        Ok(configs)
    }

    /// Parses a YAML document into one config per variant
    pub fn from_yaml(text: &str) -> Result<Vec<Self>> {
        let Value::Mapping(mut base) = serde_yaml::from_str::<Value>(text)? else {
            bail!("config must be a mapping");
        };

        let Some(variants) = base.remove("variants") else {
            return Ok(vec![serde_yaml::from_value(Value::Mapping(base))?]);
        };

        let Value::Sequence(variants) = variants else {
            bail!("'variants' must be a list");
        };
        if variants.is_empty() {
            bail!("'variants' must not be empty");
        }

        variants
            .into_iter()
            .enumerate()
            .map(|(index, variant)| -> Result<Self> {
                let Value::Mapping(overrides) = variant else {
                    bail!("variant #{} must be a mapping", index + 1);
                };
                let name = variant_name(&overrides);
                let merged = merge(&base, overrides);
                let mut config: Self = serde_yaml::from_value(Value::Mapping(merged))
                    .with_context(|| format!("variant #{}", index + 1))?;
                trace!("Expanded variant #{} ({:?})", index + 1, name);
                config.variant = name;
                Ok(config)
            })
            .collect()
    }

    /// Loads every `*.yml`/`*.yaml` file under `dir`, in path order
    pub fn load_dir(dir: &Path) -> Result<Vec<Self>> {
        if !dir.is_dir() {
            bail!("Path is not a directory: {}", dir.display());
        }

        let mut paths: Vec<PathBuf> = WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| p.is_file() && is_yaml(p) && !is_hidden(p))
            .collect();
        paths.sort();

        debug!("Found {} config file(s) in {}", paths.len(), dir.display());

        let mut configs = Vec::new();
        for path in paths {
            configs.extend(Self::load(&path)?);
        }
        Ok(configs)
    }

    /// The fingerprint this config describes
    pub fn fingerprint(&self) -> Result<Fingerprint, ParseError> {
        Fingerprint::from_parts(
            &self.oem,
            &self.product,
            &self.device,
            &self.android_version,
            &self.build_tag,
            &self.incremental,
        )
    }

    /// Display name: the model, plus the variant when there is one
    pub fn label(&self) -> String {
        match &self.variant {
            Some(variant) if variant != &self.model => format!("{} ({})", self.model, variant),
            _ => self.model.clone(),
        }
    }
}

fn variant_name(overrides: &Mapping) -> Option<String> {
    VARIANT_NAME_KEYS.iter().find_map(|key| match overrides.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

fn merge(base: &Mapping, overrides: Mapping) -> Mapping {
    let mut merged = base.clone();
    for (key, value) in overrides {
        merged.insert(key, value);
    }
    merged
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml" | "yaml")
    )
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// Accepts strings and numbers, since YAML reads `android_version: 14` as an integer
fn scalar_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(D::Error::custom(format!(
            "expected a string or number, found {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const BASE: &str = r#"
oem: TECNO
product: X6871-OP
device: TECNO-X6871
android_version: 14
build_tag: UP1A.231005.007
incremental: 241107
model: TECNO X6871
"#;

    #[test]
    fn test_single_config() {
        let configs = DeviceConfig::from_yaml(BASE).unwrap();
        assert_eq!(configs.len(), 1);

        let config = &configs[0];
        assert_eq!(config.android_version, "14");
        assert_eq!(config.incremental, "241107");
        assert_eq!(config.variant, None);
        assert_eq!(
            config.fingerprint().unwrap().as_str(),
            "TECNO/X6871-OP/TECNO-X6871:14/UP1A.231005.007/241107:user/release-keys"
        );
        assert_eq!(config.label(), "TECNO X6871");
    }

    #[test]
    fn test_variants_override_base() {
        let yaml = format!(
            "{BASE}variants:\n  - region: Global\n  - product: X6871-RU\n    incremental: 241200\n"
        );
        let configs = DeviceConfig::from_yaml(&yaml).unwrap();
        assert_eq!(configs.len(), 2);

        assert_eq!(configs[0].variant.as_deref(), Some("Global"));
        assert_eq!(configs[0].product, "X6871-OP");
        assert_eq!(configs[0].label(), "TECNO X6871 (Global)");

        assert_eq!(configs[1].variant.as_deref(), Some("X6871-RU"));
        assert_eq!(configs[1].incremental, "241200");
        assert_eq!(
            configs[1].fingerprint().unwrap().region_name(),
            Some("Russia")
        );
    }

    #[test]
    fn test_empty_variants_rejected() {
        let yaml = format!("{BASE}variants: []\n");
        assert!(DeviceConfig::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_missing_key_rejected() {
        assert!(DeviceConfig::from_yaml("oem: TECNO\nproduct: X\n").is_err());
        assert!(DeviceConfig::from_yaml("- just\n- a list\n").is_err());
    }

    #[test]
    fn test_checkin_overrides() {
        let yaml = format!("{BASE}checkin:\n  request:\n    locale: ru-RU\n");
        let configs = DeviceConfig::from_yaml(&yaml).unwrap();
        let checkin = configs[0].checkin.as_ref().unwrap();
        assert_eq!(checkin.request.locale, "ru-RU");
        assert_eq!(checkin.endpoint, otaprobe_core::CHECKIN_URL);
    }

    #[test]
    fn test_load_dir() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.yml"), BASE).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(
            dir.path().join("nested").join("a.yaml"),
            format!("{BASE}variants:\n  - name: one\n  - name: two\n"),
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        fs::write(dir.path().join(".hidden.yml"), "not: valid").unwrap();

        let configs = DeviceConfig::load_dir(dir.path()).unwrap();
        assert_eq!(configs.len(), 3);
        assert!(configs[0].source.ends_with("b.yml"));
        assert_eq!(configs[1].variant.as_deref(), Some("one"));
        assert_eq!(configs[2].variant.as_deref(), Some("two"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = DeviceConfig::load(Path::new("/nonexistent/device.yml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }
}
