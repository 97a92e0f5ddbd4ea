//! Heartbeat helper for RPC servers.
//!
//! A server calls [`heartbeat`] once at startup. The first beat is sent
//! synchronously so registration failures surface to the caller; after that
//! a background task keeps beating until a beat fails, at which point it
//! exits and the registry will evict the address when its timeout lapses.
//! Retrying after a failed beat is left to the caller.

use std::time::Duration;

use tracing::{debug, warn};

use geerpc_common::http::REGISTRY_SERVER_HEADER;
use geerpc_common::{Result, RpcError};

use crate::registry::DEFAULT_TIMEOUT;

/// Registers `addr` with the registry at `registry` and keeps it alive.
///
/// The default period is the registry's default eviction timeout minus one
/// minute, leaving a full beat of slack before eviction.
pub async fn heartbeat(registry: &str, addr: &str, period: Option<Duration>) -> Result<()> {
    let period = period.unwrap_or_else(|| DEFAULT_TIMEOUT - Duration::from_secs(60));
    let http = reqwest::Client::new();

    send_heartbeat(&http, registry, addr).await?;

    let registry = registry.to_string();
    let addr = addr.to_string();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // interval's first tick completes immediately; the synchronous beat
        // above already covered it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = send_heartbeat(&http, &registry, &addr).await {
                warn!(error = %e, "rpc server: heart beat err");
                break;
            }
        }
    });
    Ok(())
}

async fn send_heartbeat(http: &reqwest::Client, registry: &str, addr: &str) -> Result<()> {
    debug!(addr, registry, "send heart beat to registry");
    http.post(registry)
        .header(REGISTRY_SERVER_HEADER, addr)
        .send()
        .await
        .map_err(|e| RpcError::Registry(format!("heart beat err: {}", e)))?;
    Ok(())
}
