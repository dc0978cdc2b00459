//! Selective checkin response decoder.
//!
//! The response is walked field by field. Each field number is classified
//! against the [`FieldTable`]; recognized fields become a [`ResponseField`]
//! and are folded into [`DecodedFields`], everything else is skipped. A field
//! whose number is known but whose wire type doesn't match is skipped as
//! well.
//!
//! Structural damage (truncation, groups, broken varints) aborts decoding.

use crate::error::ProtocolError;
use crate::table::{FieldTable, ResponseFieldKind, ResponseFields, SettingFieldKind, SettingFields};
use crate::transport::CheckinResponse;
use crate::wire::{Field, FieldReader, FieldValue};
use serde::Serialize;
use tracing::{debug, trace};

/// A `GservicesSetting` name/value pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Setting {
    /// Setting key
    pub name: String,
    /// Setting value
    pub value: String,
}

/// A recognized response field with its decoded value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseField {
    /// Whether the server accepted the device stats
    StatsOk(bool),
    /// Server time in milliseconds since the epoch
    TimeMsec(i64),
    /// Digest of the settings set the server holds for this device
    Digest(String),
    /// One settings entry
    Setting(Setting),
    /// Assigned Android ID
    AndroidId(u64),
    /// Assigned security token
    SecurityToken(u64),
    /// Whether `settings` is a diff against the submitted digest
    SettingsDiff(bool),
    /// A setting the device should drop
    DeleteSetting(String),
}

/// Everything the decoder recognized in one response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecodedFields {
    /// `stats_ok`
    pub stats_ok: Option<bool>,
    /// `time_msec`
    pub time_msec: Option<i64>,
    /// `digest`
    pub digest: Option<String>,
    /// `android_id`
    pub android_id: Option<u64>,
    /// `security_token`
    pub security_token: Option<u64>,
    /// `settings_diff`
    pub settings_diff: Option<bool>,
    /// Settings entries in wire order
    pub settings: Vec<Setting>,
    /// Names from `delete_setting`
    pub deleted_settings: Vec<String>,
}

impl DecodedFields {
    /// Value of the first setting named `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.settings
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.value.as_str())
    }

    fn apply(&mut self, field: ResponseField) {
        match field {
            ResponseField::StatsOk(v) => self.stats_ok = Some(v),
            ResponseField::TimeMsec(v) => self.time_msec = Some(v),
            ResponseField::Digest(v) => self.digest = Some(v),
            ResponseField::Setting(s) => self.settings.push(s),
            ResponseField::AndroidId(v) => self.android_id = Some(v),
            ResponseField::SecurityToken(v) => self.security_token = Some(v),
            ResponseField::SettingsDiff(v) => self.settings_diff = Some(v),
            ResponseField::DeleteSetting(name) => self.deleted_settings.push(name),
        }
    }
}

/// Decodes checkin responses against a field table
#[derive(Debug, Clone)]
pub struct ResponseDecoder {
    response: ResponseFields,
    setting: SettingFields,
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self::new(&FieldTable::default())
    }
}

impl ResponseDecoder {
    /// Creates a decoder using the response and setting numbers from `table`
    pub fn new(table: &FieldTable) -> Self {
        Self {
            response: table.response.clone(),
            setting: table.setting.clone(),
        }
    }

    /// Consumes `response` and returns the recognized fields
    pub fn decode(&self, response: CheckinResponse) -> Result<DecodedFields, ProtocolError> {
        let body = response.into_bytes();
        let mut decoded = DecodedFields::default();
        let mut skipped = 0usize;

        for field in FieldReader::new(&body) {
            let field = field?;
            match self.classify(&field)? {
                Some(recognized) => decoded.apply(recognized),
                None => {
                    trace!("Skipping field {} at offset {}", field.number, field.offset);
                    skipped += 1;
                }
            }
        }

        debug!(
            "Decoded {} byte response: {} settings, {} fields skipped",
            body.len(),
            decoded.settings.len(),
            skipped
        );
        Ok(decoded)
    }

    fn classify(&self, field: &Field<'_>) -> Result<Option<ResponseField>, ProtocolError> {
        let Some(kind) = self.response.lookup(field.number) else {
            return Ok(None);
        };

        let value = match (kind, field.value) {
            (ResponseFieldKind::StatsOk, FieldValue::Varint(v)) => ResponseField::StatsOk(v != 0),
            (ResponseFieldKind::TimeMsec, FieldValue::Varint(v)) => ResponseField::TimeMsec(v as i64),
            (ResponseFieldKind::Digest, FieldValue::Bytes(b)) => ResponseField::Digest(text(b)),
            (ResponseFieldKind::Setting, FieldValue::Bytes(b)) => {
                ResponseField::Setting(self.decode_setting(b, field.payload_offset)?)
            }
            (ResponseFieldKind::AndroidId, FieldValue::Fixed64(v)) => ResponseField::AndroidId(v),
            (ResponseFieldKind::SecurityToken, FieldValue::Fixed64(v)) => {
                ResponseField::SecurityToken(v)
            }
            (ResponseFieldKind::SettingsDiff, FieldValue::Varint(v)) => {
                ResponseField::SettingsDiff(v != 0)
            }
            (ResponseFieldKind::DeleteSetting, FieldValue::Bytes(b)) => {
                ResponseField::DeleteSetting(text(b))
            }
            (kind, value) => {
                trace!(
                    "Field {} ({:?}) arrived as {:?}, skipping",
                    field.number,
                    kind,
                    value.wire_type()
                );
                return Ok(None);
            }
        };
        Ok(Some(value))
    }

    fn decode_setting(&self, payload: &[u8], base: usize) -> Result<Setting, ProtocolError> {
        let mut name = String::new();
        let mut value = String::new();

        for field in FieldReader::at(payload, base) {
            let field = field?;
            match (self.setting.lookup(field.number), field.value) {
                (Some(SettingFieldKind::Name), FieldValue::Bytes(b)) => name = text(b),
                (Some(SettingFieldKind::Value), FieldValue::Bytes(b)) => value = text(b),
                _ => {}
            }
        }

        Ok(Setting { name, value })
    }
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
