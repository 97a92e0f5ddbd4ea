use std::time::Duration;

use thiserror::Error;

/// Errors produced anywhere in the GeeRPC stack.
///
/// Per-request server failures (unknown method, invocation error, handle
/// timeout, admission rejection) travel over the wire as the response
/// header's `error` string and resurface on the client as [`RpcError::Server`].
/// Everything else is local to one side of the connection.
#[derive(Error, Debug)]
pub enum RpcError {
    /// Handshake carried the wrong magic number
    #[error("rpc server: invalid magic number {0:#x}")]
    InvalidMagic(u32),

    /// Handshake record was missing, malformed, or named an unknown codec
    #[error("rpc: handshake error: {0}")]
    Handshake(String),

    /// Framing violation: oversized frame, truncated frame, missing body
    #[error("rpc: codec error: {0}")]
    Codec(String),

    /// Request name did not contain a `Service.Method` dot
    #[error("rpc server: service/method request ill-formed: {0}")]
    IllFormedServiceMethod(String),

    /// No service registered under the requested name
    #[error("rpc server: can't find service {0}")]
    ServiceNotFound(String),

    /// Service exists but has no such method
    #[error("rpc server: can't find method {0}")]
    MethodNotFound(String),

    /// A service with this name is already registered
    #[error("rpc: service already defined: {0}")]
    ServiceAlreadyDefined(String),

    /// Request rejected by the server's token bucket
    #[error("rate limit exceeded")]
    RateLimited,

    /// Method invocation exceeded the connection's handle timeout
    #[error("rpc server: request handle timeout within {0:?}")]
    HandleTimeout(Duration),

    /// Error message reported by the server in a response header
    #[error("{0}")]
    Server(String),

    /// Connect plus handshake did not finish within the connect timeout
    #[error("rpc client: connect timeout: expect within {0:?}")]
    ConnectTimeout(Duration),

    /// A synchronous call did not complete within its deadline
    #[error("rpc client: call timeout: expect within {0:?}")]
    CallTimeout(Duration),

    /// The connection was closed, either locally or by the peer
    #[error("connection is shut down")]
    Shutdown,

    /// Address was not of the `protocol@addr` form
    #[error("rpc client err: wrong format '{0}', expect protocol@addr")]
    InvalidAddress(String),

    /// `protocol@addr` named a transport this build does not support
    #[error("rpc client: unsupported protocol {0}")]
    UnsupportedProtocol(String),

    /// Discovery produced an empty server list
    #[error("rpc discovery: no available servers")]
    NoAvailableServers,

    /// Registry endpoint unreachable or returned an unusable response
    #[error("rpc registry: {0}")]
    Registry(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("postcard error: {0}")]
    Postcard(#[from] postcard::Error),
}

pub type Result<T> = std::result::Result<T, RpcError>;
