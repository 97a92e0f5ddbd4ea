//! GeeRPC Codec Layer
//!
//! This module splits the wire format into two orthogonal pieces:
//!
//! - **Framing** ([`FrameReader`] / [`FrameWriter`]): length-prefixed frames
//!   over any async byte stream, `[4-byte length as u32 big-endian][payload]`
//! - **Value encoding** ([`CodecType`]): how a header or body value becomes a
//!   frame payload; negotiated once per connection during the handshake
//!
//! [`CodecReader`] and [`CodecWriter`] compose the two into the read/write
//! halves of one connection. Headers and bodies occupy separate frames, so a
//! peer that cannot (or does not want to) decode a body can discard the frame
//! and remain aligned for the next header.
//!
//! # Adding a codec
//!
//! Codecs are enumerated rather than registered at runtime: add a variant to
//! [`CodecType`] with its MIME-like serde rename, and extend the `encode` /
//! `decode` match arms. The handshake decoder then accepts the new string
//! automatically.

mod framed;

pub use framed::{recv_options, send_options, CodecReader, CodecWriter, FrameReader, FrameWriter};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::protocol::error::Result;

/// Value encoding negotiated per connection.
///
/// Serializes as a MIME-like string (`application/json`,
/// `application/postcard`); an unknown string fails the handshake decode,
/// which is how an unsupported codec request is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodecType {
    /// Self-describing JSON text encoding (the default)
    #[serde(rename = "application/json")]
    Json,
    /// Compact binary encoding via postcard
    #[serde(rename = "application/postcard")]
    Postcard,
}

impl CodecType {
    /// The MIME-like string used on the wire for this codec.
    pub fn as_mime(self) -> &'static str {
        match self {
            CodecType::Json => "application/json",
            CodecType::Postcard => "application/postcard",
        }
    }

    /// Looks up a codec by its MIME-like string.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "application/json" => Some(CodecType::Json),
            "application/postcard" => Some(CodecType::Postcard),
            _ => None,
        }
    }

    /// Encodes a value into a frame payload.
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            CodecType::Json => Ok(serde_json::to_vec(value)?),
            CodecType::Postcard => Ok(postcard::to_allocvec(value)?),
        }
    }

    /// Decodes a value out of a frame payload.
    pub fn decode<T: DeserializeOwned>(self, payload: &[u8]) -> Result<T> {
        match self {
            CodecType::Json => Ok(serde_json::from_slice(payload)?),
            CodecType::Postcard => Ok(postcard::from_bytes(payload)?),
        }
    }
}
