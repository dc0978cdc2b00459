//! Error types for the otaprobe-core library.
//!
//! Every stage of a probe has its own error enum so callers can tell a bad
//! input fingerprint from a network failure or a malformed server response.
//! All of them fold into the crate-level [`Error`] through `#[from]`.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for otaprobe operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for all probe operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The input fingerprint could not be parsed
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The checkin exchange failed at the transport level
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// The server response violated the wire format
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The decoded response was internally inconsistent
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// A field table or probe configuration failed validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Creates a new configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Returns true if re-running the same probe could plausibly succeed
    ///
    /// Parse, protocol and resolution failures are deterministic for a given
    /// input and server response, so only network errors qualify.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(err) => err.is_transient(),
            _ => false,
        }
    }
}

/// Errors raised while parsing a build fingerprint
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    /// The fingerprint does not follow `brand/product/device:release/id/incremental:type/tags`
    #[error("malformed fingerprint '{input}': {reason}")]
    MalformedFingerprint {
        /// The rejected input
        input: String,
        /// Which structural rule was violated
        reason: &'static str,
    },
}

impl ParseError {
    pub(crate) fn malformed(input: &str, reason: &'static str) -> Self {
        Self::MalformedFingerprint {
            input: input.to_string(),
            reason,
        }
    }
}

/// Errors raised by the checkin transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum NetworkError {
    /// The exchange did not complete within the overall deadline
    #[error("checkin request timed out after {elapsed:?}")]
    Timeout {
        /// The deadline that was exceeded
        elapsed: Duration,
    },

    /// The server answered with a non-success HTTP status
    #[error("checkin server rejected the request with HTTP {status}")]
    ServerRejected {
        /// HTTP status code
        status: u16,
    },

    /// Connection-level failures persisted through the whole retry budget
    #[error("checkin connection failed after {attempts} attempt(s): {message}")]
    Connection {
        /// Number of attempts made
        attempts: u32,
        /// Description of the last failure
        message: String,
    },

    /// The request could not be assembled (bad header value, compression failure)
    #[error("failed to prepare checkin request: {0}")]
    InvalidRequest(String),
}

impl NetworkError {
    /// Returns true for failures where the server never saw a well-formed exchange
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Connection { .. })
    }
}

/// Errors raised while walking the response wire format
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtocolError {
    /// A value extends past the end of the buffer
    #[error("truncated field at offset {offset}: need {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Byte offset of the value
        offset: usize,
        /// Bytes the field declares
        needed: usize,
        /// Bytes actually left
        remaining: usize,
    },

    /// A tag carries a wire type outside varint/i64/len/i32
    #[error("unsupported wire type {wire_type} at offset {offset}")]
    UnsupportedWireType {
        /// Byte offset of the tag
        offset: usize,
        /// The raw wire type bits
        wire_type: u8,
    },

    /// A varint ran off the buffer or exceeded ten bytes
    #[error("malformed varint at offset {offset}")]
    MalformedVarint {
        /// Byte offset of the varint
        offset: usize,
    },

    /// A tag decoded to field number zero or beyond the protobuf maximum
    #[error("invalid field number {number} at offset {offset}")]
    InvalidFieldNumber {
        /// Byte offset of the tag
        offset: usize,
        /// The decoded field number
        number: u64,
    },
}

/// Errors raised while turning decoded fields into a package
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ResolutionError {
    /// An incremental package names a source build other than the one submitted
    #[error("incremental package applies to '{found}', but '{expected}' was submitted")]
    InconsistentMetadata {
        /// Fingerprint sent in the request
        expected: String,
        /// Source fingerprint embedded in the response
        found: String,
    },
}

/// Errors raised while reading metadata out of an OTA package
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MetadataError {
    /// The package could not be fetched
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// The fetched bytes are not a zip archive, or the metadata entry is unreadable
    #[error("unreadable OTA package: {0}")]
    Archive(String),
}
