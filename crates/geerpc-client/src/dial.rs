//! Connection establishment.
//!
//! Three dial paths produce a [`Client`]: plain TCP, Unix domain sockets,
//! and RPC tunnelled through an HTTP CONNECT upgrade. [`x_dial`] picks one
//! from a generic `protocol@addr` address. Every path bounds connect plus
//! handshake with the option's connect timeout; when the timer wins, the
//! half-built connection is dropped and a timeout error returned.

use std::future::Future;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tracing::debug;

use geerpc_common::http::{read_head, CONNECTED, DEFAULT_RPC_PATH};
use geerpc_common::{Options, Result, RpcError};

use crate::client::Client;

/// Dials a TCP address.
pub async fn dial(addr: &str, opt: Options) -> Result<Client> {
    let timeout = opt.connect_timeout;
    connect_bounded(timeout, async move {
        let stream = TcpStream::connect(addr).await?;
        Client::new(stream, opt).await
    })
    .await
}

/// Dials a Unix domain socket path.
#[cfg(unix)]
pub async fn dial_unix(path: &str, opt: Options) -> Result<Client> {
    let timeout = opt.connect_timeout;
    connect_bounded(timeout, async move {
        let stream = UnixStream::connect(path).await?;
        Client::new(stream, opt).await
    })
    .await
}

/// Dials an HTTP endpoint and upgrades it to an RPC stream via CONNECT.
pub async fn dial_http(addr: &str, opt: Options) -> Result<Client> {
    let timeout = opt.connect_timeout;
    connect_bounded(timeout, async move {
        let mut stream = TcpStream::connect(addr).await?;
        stream
            .write_all(format!("CONNECT {} HTTP/1.0\r\n\r\n", DEFAULT_RPC_PATH).as_bytes())
            .await?;

        let head = read_head(&mut stream).await?;
        let status_line = head.lines().next().unwrap_or_default();
        let status = status_line.splitn(2, ' ').nth(1).unwrap_or_default();
        if status != CONNECTED {
            return Err(RpcError::Handshake(format!(
                "unexpected HTTP response: {}",
                status_line
            )));
        }

        debug!(addr, "rpc client: http upgrade complete");
        Client::new(stream, opt).await
    })
    .await
}

/// Dials a generic `protocol@addr` address, e.g. `tcp@10.0.0.1:9999`,
/// `http@10.0.0.1:7001` or `unix@/tmp/geerpc.sock`.
pub async fn x_dial(rpc_addr: &str, opt: Options) -> Result<Client> {
    let Some((protocol, addr)) = rpc_addr.split_once('@') else {
        return Err(RpcError::InvalidAddress(rpc_addr.to_string()));
    };
    match protocol {
        "http" => dial_http(addr, opt).await,
        "tcp" => dial(addr, opt).await,
        #[cfg(unix)]
        "unix" => dial_unix(addr, opt).await,
        other => Err(RpcError::UnsupportedProtocol(other.to_string())),
    }
}

/// Races a connect-plus-handshake factory against the connect timeout; zero
/// disables the bound. Losing the race drops the factory, and with it any
/// partially established connection.
async fn connect_bounded<F>(timeout: Duration, factory: F) -> Result<Client>
where
    F: Future<Output = Result<Client>>,
{
    if timeout.is_zero() {
        return factory.await;
    }
    match tokio::time::timeout(timeout, factory).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::ConnectTimeout(timeout)),
    }
}
