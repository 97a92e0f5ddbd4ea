//! GeeRPC Protocol Definitions
//!
//! This module defines the handshake record and the per-request header that
//! frame every exchange between a GeeRPC client and server.
//!
//! # Protocol Types
//!
//! - **[`Options`]**: per-connection handshake settings (magic number, codec
//!   selection, timeouts), always transmitted as a JSON record so the server
//!   can decode it before any codec has been negotiated
//! - **[`Header`]**: per-request metadata (`service_method`, `seq`, `error`)
//!   encoded with the negotiated codec
//!
//! # Example
//!
//! ```
//! use geerpc_common::protocol::Options;
//! use geerpc_common::codec::CodecType;
//! use std::time::Duration;
//!
//! let opt = Options::default()
//!     .with_codec(CodecType::Json)
//!     .with_handle_timeout(Duration::from_millis(500));
//! assert_eq!(opt.magic_number, geerpc_common::MAGIC_NUMBER);
//! ```

pub mod error;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::CodecType;

/// Marks a connection as speaking the GeeRPC protocol.
pub const MAGIC_NUMBER: u32 = 0x3bef5c;

/// Default connect timeout applied by [`Options::default`].
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-request message header.
///
/// The header travels in its own frame ahead of the body. `seq` is chosen by
/// the client and echoed back by the server so responses can be matched to
/// pending calls in any order. `error` is empty on success; when non-empty it
/// carries a server-side message and the body is a placeholder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Dotted `Service.Method` name; empty on admission rejections
    pub service_method: String,
    /// Client-chosen sequence number used for response correlation
    pub seq: u64,
    /// Server-side error message; empty on success
    pub error: String,
}

/// Per-connection handshake record.
///
/// Sent exactly once by the client, as a JSON frame, before any request. The
/// server validates the magic number, installs the requested codec, and uses
/// `handle_timeout` to bound each method invocation on this connection.
///
/// Timeouts serialize as integer milliseconds; zero disables the timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    #[serde(rename = "MagicNumber")]
    pub magic_number: u32,
    #[serde(rename = "CodecType")]
    pub codec_type: CodecType,
    #[serde(rename = "ConnectTimeout", with = "duration_ms")]
    pub connect_timeout: Duration,
    #[serde(rename = "HandleTimeout", with = "duration_ms")]
    pub handle_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            magic_number: MAGIC_NUMBER,
            codec_type: CodecType::Json,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handle_timeout: Duration::ZERO,
        }
    }
}

impl Options {
    /// Selects the codec used for all frames after the handshake.
    pub fn with_codec(mut self, codec_type: CodecType) -> Self {
        self.codec_type = codec_type;
        self
    }

    /// Bounds connect-plus-handshake when dialing; zero disables the bound.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bounds each server-side method invocation; zero disables the bound.
    pub fn with_handle_timeout(mut self, timeout: Duration) -> Self {
        self.handle_timeout = timeout;
        self
    }
}

/// Serializes a `Duration` as integer milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}
