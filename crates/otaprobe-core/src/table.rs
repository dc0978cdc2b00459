//! Protocol field-number and settings-key tables.
//!
//! Google does not publish the checkin schema. The defaults below follow the
//! `checkin.proto` that circulates in open-source checkin clients; every
//! number can be overridden from configuration when it has to be corrected
//! against live traffic. Lookups are plain comparisons against the table,
//! producing one of a closed set of field kinds.

use crate::error::{Error, Result};
use crate::wire::MAX_FIELD_NUMBER;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Field numbers for every message the probe touches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldTable {
    /// `AndroidCheckinRequest`
    pub request: RequestFields,
    /// `AndroidCheckinProto`
    pub checkin: CheckinFields,
    /// `AndroidBuildProto`
    pub build: BuildFields,
    /// `AndroidCheckinResponse`
    pub response: ResponseFields,
    /// `GservicesSetting`
    pub setting: SettingFields,
}

impl FieldTable {
    /// Checks that every number is in range and unique within its message
    pub fn validate(&self) -> Result<()> {
        check_message("request", &self.request.numbers())?;
        check_message("checkin", &self.checkin.numbers())?;
        check_message("build", &self.build.numbers())?;
        check_message("response", &self.response.numbers())?;
        check_message("setting", &self.setting.numbers())
    }
}

fn check_message(message: &str, numbers: &[(&str, u32)]) -> Result<()> {
    let mut seen = HashSet::new();
    for &(name, number) in numbers {
        if number == 0 || number > MAX_FIELD_NUMBER {
            return Err(Error::invalid_config(format!(
                "{message}.{name}: field number {number} must be between 1 and {MAX_FIELD_NUMBER}"
            )));
        }
        if !seen.insert(number) {
            return Err(Error::invalid_config(format!(
                "{message}.{name}: field number {number} is used twice"
            )));
        }
    }
    Ok(())
}

/// `AndroidCheckinRequest` field numbers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct RequestFields {
    pub imei: u32,
    pub id: u32,
    pub digest: u32,
    pub checkin: u32,
    pub locale: u32,
    pub mac_addr: u32,
    pub time_zone: u32,
    pub version: u32,
    pub serial_number: u32,
    pub mac_addr_type: u32,
    pub fragment: u32,
    pub user_serial_number: u32,
    pub fetch_system_updates: u32,
}

impl Default for RequestFields {
    fn default() -> Self {
        Self {
            imei: 1,
            id: 2,
            digest: 3,
            checkin: 4,
            locale: 6,
            mac_addr: 9,
            time_zone: 12,
            version: 14,
            serial_number: 16,
            mac_addr_type: 19,
            fragment: 20,
            user_serial_number: 22,
            fetch_system_updates: 23,
        }
    }
}

impl RequestFields {
    fn numbers(&self) -> [(&'static str, u32); 13] {
        [
            ("imei", self.imei),
            ("id", self.id),
            ("digest", self.digest),
            ("checkin", self.checkin),
            ("locale", self.locale),
            ("mac_addr", self.mac_addr),
            ("time_zone", self.time_zone),
            ("version", self.version),
            ("serial_number", self.serial_number),
            ("mac_addr_type", self.mac_addr_type),
            ("fragment", self.fragment),
            ("user_serial_number", self.user_serial_number),
            ("fetch_system_updates", self.fetch_system_updates),
        ]
    }
}

/// `AndroidCheckinProto` field numbers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct CheckinFields {
    pub build: u32,
    pub cell_operator: u32,
    pub sim_operator: u32,
    pub roaming: u32,
    pub user_number: u32,
    pub device_type: u32,
    pub voice_capable: u32,
}

impl Default for CheckinFields {
    fn default() -> Self {
        Self {
            build: 1,
            cell_operator: 6,
            sim_operator: 7,
            roaming: 8,
            user_number: 9,
            device_type: 14,
            voice_capable: 15,
        }
    }
}

impl CheckinFields {
    fn numbers(&self) -> [(&'static str, u32); 7] {
        [
            ("build", self.build),
            ("cell_operator", self.cell_operator),
            ("sim_operator", self.sim_operator),
            ("roaming", self.roaming),
            ("user_number", self.user_number),
            ("device_type", self.device_type),
            ("voice_capable", self.voice_capable),
        ]
    }
}

/// `AndroidBuildProto` field numbers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct BuildFields {
    pub id: u32,
    pub timestamp: u32,
    pub device: u32,
    pub sdk_version: u32,
}

impl Default for BuildFields {
    fn default() -> Self {
        Self {
            id: 1,
            timestamp: 7,
            device: 9,
            sdk_version: 10,
        }
    }
}

impl BuildFields {
    fn numbers(&self) -> [(&'static str, u32); 4] {
        [
            ("id", self.id),
            ("timestamp", self.timestamp),
            ("device", self.device),
            ("sdk_version", self.sdk_version),
        ]
    }
}

/// Response fields the decoder recognizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFieldKind {
    /// `stats_ok` (bool)
    StatsOk,
    /// `time_msec` (int64)
    TimeMsec,
    /// `digest` (string)
    Digest,
    /// `setting` (embedded `GservicesSetting`)
    Setting,
    /// `android_id` (fixed64)
    AndroidId,
    /// `security_token` (fixed64)
    SecurityToken,
    /// `settings_diff` (bool)
    SettingsDiff,
    /// `delete_setting` (string)
    DeleteSetting,
}

/// `AndroidCheckinResponse` field numbers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct ResponseFields {
    pub stats_ok: u32,
    pub time_msec: u32,
    pub digest: u32,
    pub setting: u32,
    pub android_id: u32,
    pub security_token: u32,
    pub settings_diff: u32,
    pub delete_setting: u32,
}

impl Default for ResponseFields {
    fn default() -> Self {
        Self {
            stats_ok: 1,
            time_msec: 3,
            digest: 4,
            setting: 5,
            android_id: 7,
            security_token: 8,
            settings_diff: 9,
            delete_setting: 10,
        }
    }
}

impl ResponseFields {
    /// Maps a field number to the field it carries, if recognized
    pub fn lookup(&self, number: u32) -> Option<ResponseFieldKind> {
        use ResponseFieldKind::*;

        let kind = match number {
            n if n == self.stats_ok => StatsOk,
            n if n == self.time_msec => TimeMsec,
            n if n == self.digest => Digest,
            n if n == self.setting => Setting,
            n if n == self.android_id => AndroidId,
            n if n == self.security_token => SecurityToken,
            n if n == self.settings_diff => SettingsDiff,
            n if n == self.delete_setting => DeleteSetting,
            _ => return None,
        };
        Some(kind)
    }

    fn numbers(&self) -> [(&'static str, u32); 8] {
        [
            ("stats_ok", self.stats_ok),
            ("time_msec", self.time_msec),
            ("digest", self.digest),
            ("setting", self.setting),
            ("android_id", self.android_id),
            ("security_token", self.security_token),
            ("settings_diff", self.settings_diff),
            ("delete_setting", self.delete_setting),
        ]
    }
}

/// Fields of a `GservicesSetting` entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingFieldKind {
    /// Setting key
    Name,
    /// Setting value
    Value,
}

/// `GservicesSetting` field numbers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct SettingFields {
    pub name: u32,
    pub value: u32,
}

impl Default for SettingFields {
    fn default() -> Self {
        Self { name: 1, value: 2 }
    }
}

impl SettingFields {
    /// Maps a field number to the setting part it carries, if recognized
    pub fn lookup(&self, number: u32) -> Option<SettingFieldKind> {
        match number {
            n if n == self.name => Some(SettingFieldKind::Name),
            n if n == self.value => Some(SettingFieldKind::Value),
            _ => None,
        }
    }

    fn numbers(&self) -> [(&'static str, u32); 2] {
        [("name", self.name), ("value", self.value)]
    }
}

/// Settings keys that carry update metadata in the checkin response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingKeys {
    /// Download URL of the offered package
    pub url: String,
    /// Marketing title of the update
    pub title: String,
    /// HTML changelog
    pub description: String,
    /// Package size, raw bytes or a human string such as `1.2 GB`
    pub size: String,
    /// Package checksum
    pub checksum: String,
    /// Build an incremental package applies to
    pub source_fingerprint: String,
    /// Build the package installs
    pub target_fingerprint: String,
    /// Values starting with this prefix are treated as the package URL when the URL key is absent
    pub ota_url_prefix: String,
}

impl Default for SettingKeys {
    fn default() -> Self {
        Self {
            url: "update_url".to_string(),
            title: "update_title".to_string(),
            description: "update_description".to_string(),
            size: "update_size".to_string(),
            checksum: "update_checksum".to_string(),
            source_fingerprint: "update_source_fingerprint".to_string(),
            target_fingerprint: "update_target_fingerprint".to_string(),
            ota_url_prefix: "https://android.googleapis.com/packages/ota".to_string(),
        }
    }
}
