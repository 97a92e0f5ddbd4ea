//! GeeRPC Registry
//!
//! A lightweight service registry: RPC servers POST periodic heartbeats, the
//! registry tracks each address by its last beat, and discovery clients GET
//! the alive list. Entries whose heartbeat is older than the eviction
//! timeout disappear from the next read.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use geerpc_registry::{heartbeat, Registry};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Registry side
//! let registry = Arc::new(Registry::default());
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:9999").await?;
//! tokio::spawn(registry.serve(listener));
//!
//! // Server side
//! heartbeat(
//!     "http://127.0.0.1:9999/_geerpc_/registry",
//!     "tcp@127.0.0.1:9001",
//!     None,
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod heartbeat;
pub mod registry;

pub use heartbeat::heartbeat;
pub use registry::{Registry, DEFAULT_TIMEOUT};
