//! Probe configuration.

use crate::error::{Error, Result};
use crate::metadata::MetadataConfig;
use crate::request::RequestOptions;
use crate::table::{FieldTable, SettingKeys};
use crate::transport::{TransportConfig, CHECKIN_URL};
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Everything a [`Prober`](crate::Prober) needs besides the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Checkin endpoint URL
    pub endpoint: String,
    /// Transport timeouts and retry budget
    pub transport: TransportConfig,
    /// Constant request values
    pub request: RequestOptions,
    /// Protocol field numbers
    pub fields: FieldTable,
    /// Settings keys carrying update metadata
    pub keys: SettingKeys,
    /// Package metadata lookup for offered updates
    pub metadata: MetadataConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            endpoint: CHECKIN_URL.to_string(),
            transport: TransportConfig::default(),
            request: RequestOptions::default(),
            fields: FieldTable::default(),
            keys: SettingKeys::default(),
            metadata: MetadataConfig::default(),
        }
    }
}

impl ProbeConfig {
    /// Creates a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the checkin endpoint
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = url.into();
        self
    }

    /// Set the transport configuration
    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Set the constant request values
    pub fn request(mut self, request: RequestOptions) -> Self {
        self.request = request;
        self
    }

    /// Set the field-number table
    pub fn fields(mut self, fields: FieldTable) -> Self {
        self.fields = fields;
        self
    }

    /// Set the settings keys
    pub fn keys(mut self, keys: SettingKeys) -> Self {
        self.keys = keys;
        self
    }

    /// Set the package metadata lookup
    pub fn metadata(mut self, metadata: MetadataConfig) -> Self {
        self.metadata = metadata;
        self
    }

    /// Parses the endpoint
    pub fn endpoint_url(&self) -> Result<Url> {
        Url::parse(&self.endpoint)
            .map_err(|e| Error::invalid_config(format!("endpoint '{}': {e}", self.endpoint)))
    }

    /// Checks the endpoint and the field table
    pub fn validate(&self) -> Result<()> {
        let url = self.endpoint_url()?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::invalid_config(format!(
                "endpoint '{}': scheme must be http or https",
                self.endpoint
            )));
        }
        if self.keys.url.is_empty() {
            return Err(Error::invalid_config("keys.url must not be empty"));
        }
        if self.metadata.enabled && self.metadata.window_bytes == 0 {
            return Err(Error::invalid_config("metadata.window_bytes must not be zero"));
        }
        self.fields.validate()
    }
}
