//! GeeRPC Common Types and Framing
//!
//! This crate provides the protocol definitions, wire framing and codecs
//! shared by the GeeRPC server, client and registry crates.
//!
//! # Overview
//!
//! GeeRPC is a lightweight RPC framework: a client multiplexes concurrent
//! calls over a single connection, the server dispatches them against a
//! registry of services, and responses are correlated back to callers by
//! sequence number. This crate contains everything both ends agree on:
//!
//! - **Protocol Layer**: the per-request [`Header`], the per-connection
//!   handshake [`Options`] record, and the [`RpcError`] type
//! - **Codec Layer**: length-prefixed framing plus pluggable value encodings
//!   (JSON and postcard), selected per connection during the handshake
//! - **Admission**: the token-bucket request admitter used by the server
//!
//! # Wire Format
//!
//! All traffic is length-prefixed frames:
//!
//! ```text
//! [4-byte length as u32 big-endian] [payload]
//! ```
//!
//! The first frame on a connection carries the JSON-encoded [`Options`]
//! record. Every request and response thereafter is a pair of frames: a
//! header frame followed by a body frame, both encoded with the negotiated
//! [`CodecType`]. Keeping the body in its own frame means a peer can always
//! skip a body it does not want to decode and stay frame-aligned.
//!
//! # Components
//!
//! - [`protocol`] - Core protocol types (`Header`, `Options`, errors)
//! - [`codec`] - Frame reader/writer and codec composition
//! - [`rate_limit`] - Token-bucket admission control
//! - [`http`] - Constants and helpers for the HTTP CONNECT upgrade and the
//!   registry's HTTP protocol

pub mod codec;
pub mod http;
pub mod protocol;
pub mod rate_limit;

pub use codec::{CodecReader, CodecType, CodecWriter, FrameReader, FrameWriter};
pub use protocol::error::{Result, RpcError};
pub use protocol::{Header, Options, MAGIC_NUMBER};
pub use rate_limit::{TokenBucket, TokenBucketConfig};
