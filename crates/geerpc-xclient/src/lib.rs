//! GeeRPC Load-Balancing Client
//!
//! This crate fronts a fleet of GeeRPC servers with a single client surface:
//!
//! - **[`Discovery`]**: where the server addresses come from, either an
//!   explicit list ([`MultiServersDiscovery`]) or a heartbeat registry
//!   ([`RegistryDiscovery`])
//! - **[`SelectMode`]**: how one server is picked per call (random or
//!   round-robin)
//! - **[`XClient`]**: the call surface, with per-address connection caching
//!   and fail-fast broadcast fan-out
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use geerpc_common::Options;
//! use geerpc_xclient::{MultiServersDiscovery, SelectMode, XClient};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let discovery = Arc::new(MultiServersDiscovery::new(vec![
//!     "tcp@127.0.0.1:9001".to_string(),
//!     "tcp@127.0.0.1:9002".to_string(),
//! ]));
//! let xc = XClient::new(discovery, SelectMode::RoundRobin, Options::default());
//!
//! let sum: i32 = xc.call("Arith.Add", &(1i32, 2i32)).await?;
//! # Ok(())
//! # }
//! ```

pub mod discovery;
pub mod registry_discovery;
pub mod xclient;

pub use discovery::{Discovery, MultiServersDiscovery, SelectMode};
pub use registry_discovery::RegistryDiscovery;
pub use xclient::XClient;
