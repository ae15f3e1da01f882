//! Versioned envelope for messages on the job queue and event bus.
//!
//! Every message carries a format version and a unique message id. The id
//! doubles as the JetStream de-duplication key, so a publisher retry does
//! not enqueue the same job twice.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// The current envelope version.
pub const CURRENT_VERSION: u32 = 1;

/// A versioned envelope around a message payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub version: u32,
    pub message_id: Ulid,
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Wraps a payload with the current version and a fresh message id.
    #[must_use]
    pub fn new(payload: T) -> Self {
        Self {
            version: CURRENT_VERSION,
            message_id: Ulid::new(),
            payload,
        }
    }

    #[must_use]
    pub fn into_payload(self) -> T {
        self.payload
    }

    #[must_use]
    pub fn payload(&self) -> &T {
        &self.payload
    }
}

impl<T: Serialize> Envelope<T> {
    /// Serializes the envelope to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Decoding failure for an incoming message.
#[derive(Debug)]
pub enum DecodeError {
    /// The bytes are not an envelope.
    Malformed(serde_json::Error),
    /// The envelope was written by a newer format.
    UnsupportedVersion(u32),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(err) => write!(f, "malformed envelope: {err}"),
            Self::UnsupportedVersion(version) => {
                write!(f, "unsupported envelope version {version}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// An envelope whose payload has not been decoded yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RawEnvelope {
    version: u32,
    message_id: Ulid,
    payload: serde_json::Value,
}

impl<T: for<'de> Deserialize<'de>> Envelope<T> {
    /// Decodes an envelope, checking the version before the payload.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed bytes or a version newer than
    /// [`CURRENT_VERSION`].
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let raw: RawEnvelope = serde_json::from_slice(bytes).map_err(DecodeError::Malformed)?;
        if raw.version > CURRENT_VERSION {
            return Err(DecodeError::UnsupportedVersion(raw.version));
        }
        let payload = serde_json::from_value(raw.payload).map_err(DecodeError::Malformed)?;
        Ok(Self {
            version: raw.version,
            message_id: raw.message_id,
            payload,
        })
    }
}
