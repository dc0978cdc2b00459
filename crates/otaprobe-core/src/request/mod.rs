//! Checkin request encoding.
//!
//! The request is written field by field with [`MessageWriter`] so the byte
//! layout matches what a stock device sends: an `AndroidCheckinRequest`
//! wrapping an `AndroidCheckinProto`, which wraps an `AndroidBuildProto`
//! carrying the fingerprint.

mod identity;

use crate::fingerprint::Fingerprint;
use crate::table::FieldTable;
use crate::wire::MessageWriter;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::trace;

pub use identity::DeviceIdentity;

/// Digest of an empty settings set; a fresh device reports this
const EMPTY_DIGEST: &str = "1-da39a3ee5e6b4b0d3255bfef95601890afd80709";

/// What the checkin is asking the server for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntentCode {
    /// Ask the server to include pending system updates
    #[default]
    SoftwareUpdateCheck,
    /// Plain periodic checkin without an update query
    Routine,
}

impl IntentCode {
    /// Value of the `fetch_system_updates` request field
    pub fn fetch_system_updates(self) -> i32 {
        match self {
            IntentCode::SoftwareUpdateCheck => 1,
            IntentCode::Routine => 0,
        }
    }
}

/// Constant request values that aren't derived from the fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    /// Locale reported by the device
    pub locale: String,
    /// Olson time zone reported by the device
    pub time_zone: String,
    /// MCC+MNC of the network operator
    pub cell_operator: String,
    /// MCC+MNC of the SIM issuer
    pub sim_operator: String,
    /// Roaming descriptor; `WIFI::` means not on a cellular network
    pub roaming: String,
    /// Checkin protocol version marker
    pub client_version: i32,
    /// Device type code
    pub device_type: i32,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            locale: "en-US".to_string(),
            time_zone: "America/New_York".to_string(),
            cell_operator: "310260".to_string(),
            sim_operator: "310260".to_string(),
            roaming: "WIFI::".to_string(),
            client_version: 3,
            device_type: 2,
        }
    }
}

impl RequestOptions {
    /// Creates options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the reported locale
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    /// Sets the reported time zone
    pub fn time_zone(mut self, tz: impl Into<String>) -> Self {
        self.time_zone = tz.into();
        self
    }

    /// Sets both the cell and SIM operator codes
    pub fn operator(mut self, mcc_mnc: impl Into<String>) -> Self {
        let code = mcc_mnc.into();
        self.sim_operator = code.clone();
        self.cell_operator = code;
        self
    }
}

/// An encoded, immutable checkin request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckinRequest {
    payload: Bytes,
    intent: IntentCode,
    user_agent: String,
}

impl CheckinRequest {
    /// Uncompressed protobuf payload
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Intent the request was built for
    pub fn intent(&self) -> IntentCode {
        self.intent
    }

    /// Dalvik user-agent matching the submitted build
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

/// Builds checkin requests from fingerprints
#[derive(Debug, Clone, Default)]
pub struct RequestEncoder {
    fields: FieldTable,
    options: RequestOptions,
}

impl RequestEncoder {
    /// Creates an encoder with an explicit field table and options
    pub fn new(fields: FieldTable, options: RequestOptions) -> Self {
        Self { fields, options }
    }

    /// Encodes a request for `fingerprint`, using the device codename as model
    pub fn build(&self, fingerprint: &Fingerprint, intent: IntentCode) -> CheckinRequest {
        self.build_with_model(fingerprint, intent, None)
    }

    /// Encodes a request, reporting `model` in the user-agent when given
    pub fn build_with_model(
        &self,
        fingerprint: &Fingerprint,
        intent: IntentCode,
        model: Option<&str>,
    ) -> CheckinRequest {
        let identity = DeviceIdentity::derive(fingerprint);
        let f = &self.fields;
        let opts = &self.options;

        let mut build = MessageWriter::new();
        build
            .string(f.build.id, fingerprint.as_str())
            .int64(f.build.timestamp, 0)
            .string(f.build.device, fingerprint.device());
        if let Some(sdk) = fingerprint.sdk_level() {
            build.int32(f.build.sdk_version, sdk as i32);
        }

        let mut checkin = MessageWriter::new();
        checkin
            .message(f.checkin.build, &build)
            .string(f.checkin.cell_operator, &opts.cell_operator)
            .string(f.checkin.sim_operator, &opts.sim_operator)
            .string(f.checkin.roaming, &opts.roaming)
            .int32(f.checkin.user_number, 0)
            .int32(f.checkin.device_type, opts.device_type)
            .bool(f.checkin.voice_capable, false);

        let mut request = MessageWriter::new();
        request
            .string(f.request.imei, &identity.imei)
            .int64(f.request.id, 0)
            .string(f.request.digest, EMPTY_DIGEST)
            .message(f.request.checkin, &checkin)
            .string(f.request.locale, &opts.locale)
            .string(f.request.mac_addr, &identity.mac_addr)
            .string(f.request.time_zone, &opts.time_zone)
            .int32(f.request.version, opts.client_version)
            .string(f.request.serial_number, &identity.serial_number)
            .string(f.request.mac_addr_type, "wifi")
            .int32(f.request.fragment, 0)
            .int32(f.request.user_serial_number, 0)
            .int32(f.request.fetch_system_updates, intent.fetch_system_updates());

        let payload = request.finish();
        trace!(
            "Encoded checkin request for {} ({} bytes)",
            fingerprint,
            payload.len()
        );

        CheckinRequest {
            payload,
            intent,
            user_agent: format!(
                "Dalvik/2.1.0 (Linux; U; Android {}; {} Build/{})",
                fingerprint.release(),
                model.unwrap_or(fingerprint.device()),
                fingerprint.build_id()
            ),
        }
    }
}
