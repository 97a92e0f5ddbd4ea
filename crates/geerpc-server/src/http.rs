//! RPC over an HTTP port via CONNECT upgrade.
//!
//! A client issues `CONNECT` against the RPC path; the server answers with
//! the fixed `200 Connected to Gee RPC` status line and the raw TCP stream
//! is handed to the normal connection loop. The listener is single-purpose,
//! so no HTTP router sits in front of it: the request head is parsed just
//! far enough to enforce the CONNECT method.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use geerpc_common::http::{read_head, CONNECTED, MUST_CONNECT};
use geerpc_common::Result;

use crate::server::Server;

impl Server {
    /// Accepts HTTP connections, upgrading each CONNECT into an RPC stream.
    pub async fn serve_http(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.upgrade(stream).await {
                    debug!(%peer, error = %e, "rpc server: http upgrade failed");
                }
            });
        }
    }

    async fn upgrade(self: Arc<Self>, mut stream: TcpStream) -> Result<()> {
        let head = read_head(&mut stream).await?;
        let request_line = head.lines().next().unwrap_or_default();
        let method = request_line.split_whitespace().next().unwrap_or_default();

        if method != "CONNECT" {
            let response = format!(
                "HTTP/1.0 405 Method Not Allowed\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}\n",
                MUST_CONNECT
            );
            stream.write_all(response.as_bytes()).await?;
            let _ = stream.shutdown().await;
            return Ok(());
        }

        stream
            .write_all(format!("HTTP/1.0 {}\n\n", CONNECTED).as_bytes())
            .await?;
        self.serve_conn(stream).await;
        Ok(())
    }
}
