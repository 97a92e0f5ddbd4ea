//! GeeRPC Client
//!
//! This crate provides the client half of GeeRPC: a multiplexing [`Client`]
//! that issues concurrent calls over a single connection, and the dial layer
//! that establishes connections over TCP, Unix sockets, or an HTTP CONNECT
//! upgrade.
//!
//! # Overview
//!
//! Every call is assigned a monotonically increasing sequence number and
//! recorded in a pending table before its request is written; one background
//! task reads responses and completes the matching pending call, so replies
//! may arrive in any order. Dropping an unresolved call (for example when a
//! `tokio::time::timeout` around it fires) deregisters it, and its late
//! response is discarded.
//!
//! # Usage
//!
//! ```no_run
//! use geerpc_client::{dial, Options};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = dial("127.0.0.1:9999", Options::default()).await?;
//!     let sum: i32 = client.call("Arith.Add", &(1i32, 2i32)).await?;
//!     assert_eq!(sum, 3);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod dial;

pub use client::{Client, PendingCall};
pub use dial::{dial, dial_http, x_dial};
#[cfg(unix)]
pub use dial::dial_unix;
pub use geerpc_common::{Options, Result, RpcError};
