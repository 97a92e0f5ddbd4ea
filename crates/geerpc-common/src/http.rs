//! Constants and helpers for GeeRPC's two HTTP touch points: the CONNECT
//! upgrade that tunnels RPC over an HTTP port, and the registry's
//! header-based discovery protocol.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::protocol::error::{Result, RpcError};

/// Path an HTTP client CONNECTs to for the RPC upgrade.
pub const DEFAULT_RPC_PATH: &str = "/_geerpc_";

/// Status text exchanged on a successful CONNECT upgrade.
pub const CONNECTED: &str = "200 Connected to Gee RPC";

/// Body returned for non-CONNECT requests on the RPC endpoint.
pub const MUST_CONNECT: &str = "405 must CONNECT";

/// Default path the registry serves on.
pub const DEFAULT_REGISTRY_PATH: &str = "/_geerpc_/registry";

/// Response header carrying the comma-joined alive server list.
pub const REGISTRY_SERVERS_HEADER: &str = "X-Geerpc-Servers";

/// Request header carrying a heartbeating server's own address.
pub const REGISTRY_SERVER_HEADER: &str = "X-Geerpc-Server";

/// Upper bound on an HTTP head read during the CONNECT upgrade.
const MAX_HEAD_SIZE: usize = 8 * 1024;

/// Reads an HTTP request or response head, up to and including the blank
/// line. Reads byte-at-a-time so nothing beyond the head is consumed; the
/// bytes that follow belong to the RPC stream.
pub async fn read_head<R: AsyncRead + Unpin>(stream: &mut R) -> Result<String> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(RpcError::Handshake(
                "connection closed during HTTP upgrade".to_string(),
            ));
        }
        head.push(byte[0]);
        if head.ends_with(b"\r\n\r\n") || head.ends_with(b"\n\n") {
            break;
        }
        if head.len() > MAX_HEAD_SIZE {
            return Err(RpcError::Handshake("HTTP head too large".to_string()));
        }
    }
    String::from_utf8(head).map_err(|e| RpcError::Handshake(format!("HTTP head not UTF-8: {}", e)))
}
