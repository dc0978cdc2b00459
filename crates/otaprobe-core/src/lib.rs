//! # otaprobe-core
//!
//! A library for asking Google's Android checkin service whether an OTA
//! update exists for a given build fingerprint.
//!
//! A probe impersonates a stock device checking in: it encodes a checkin
//! request for the fingerprint, POSTs it, walks the protobuf response for
//! the handful of fields that matter and turns the update settings into an
//! [`OtaPackage`], or reports that nothing is available.
//!
//! ## Architecture
//!
//! - [`fingerprint`]: Build fingerprint parsing and accessors
//! - [`request`]: Checkin request encoding and synthetic device identity
//! - [`transport`]: The [`Transport`] seam, HTTPS implementation and retries
//! - [`response`]: Selective decoding of checkin responses
//! - [`resolver`]: Settings to package resolution
//! - [`metadata`]: Metadata read from the head of an offered package
//! - [`table`]: Configurable field numbers and settings keys
//! - [`wire`]: Protobuf wire format primitives
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use otaprobe_core::{HttpTransport, ProbeConfig, Prober, Resolution};
//!
//! # async fn run() -> otaprobe_core::Result<()> {
//! let config = ProbeConfig::default();
//! let transport = HttpTransport::new(config.transport.clone())?;
//! let prober = Prober::new(&transport, &config)?;
//!
//! match prober.probe("brand/product/device:13/ID123/456:user/release-keys").await? {
//!     Resolution::Update(pkg) => println!("{} ({})", pkg.url(), pkg.kind().name()),
//!     Resolution::NoUpdateAvailable => println!("up to date"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Extensibility
//!
//! - [`Transport`]: Substitute the network layer, e.g. with a mock in tests
//! - [`FieldTable`] and [`SettingKeys`]: Correct field numbers or settings
//!   keys from configuration without a rebuild
//!

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod metadata;
pub mod probe;
pub mod request;
pub mod resolver;
pub mod response;
pub mod table;
pub mod transport;
pub mod wire;

// Re-export primary types for convenience
pub use config::ProbeConfig;
pub use error::{Error, Result};
pub use fingerprint::Fingerprint;
pub use metadata::{MetadataConfig, OtaMetadata};
pub use probe::Prober;
pub use request::{CheckinRequest, IntentCode, RequestEncoder, RequestOptions};
pub use resolver::{OtaPackage, PackageKind, Resolution, Resolver};
pub use response::{DecodedFields, ResponseDecoder, Setting};
pub use table::{FieldTable, SettingKeys};
pub use transport::{
    CheckinResponse, HttpTransport, RetryPolicy, Transport, TransportConfig, CHECKIN_URL,
};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
