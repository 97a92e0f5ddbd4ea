//! GeeRPC Server
//!
//! This crate provides the server half of GeeRPC: a registry of user
//! services and the per-connection engine that reads framed requests,
//! dispatches them, and writes framed responses.
//!
//! # Architecture
//!
//! - A [`Service`] is built once from typed async method handlers and
//!   registered on a [`Server`]; the service map is append-only and safe for
//!   concurrent lookup.
//! - Each connection runs one reader task. Requests are admitted through a
//!   per-connection token bucket, resolved against the service map, and
//!   executed on spawned worker tasks, so a slow method never blocks the
//!   request loop.
//! - All responses on a connection are serialized through one write mutex;
//!   they may be written out of request order, correlation is by sequence
//!   number alone.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use geerpc_server::{Server, Service};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let server = Arc::new(Server::new());
//! server.register(Service::new("Arith").method(
//!     "Add",
//!     |(a, b): (i32, i32)| async move { Ok::<i32, String>(a + b) },
//! ))?;
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:9999").await?;
//! server.accept(listener).await?;
//! # Ok(())
//! # }
//! ```

mod http;
pub mod server;
pub mod service;

pub use server::Server;
pub use service::{MethodType, Service};
