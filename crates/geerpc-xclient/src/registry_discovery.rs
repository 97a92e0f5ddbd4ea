//! Registry-backed discovery.
//!
//! Wraps [`MultiServersDiscovery`] and refreshes its list from a GeeRPC
//! registry whenever the cached copy is older than the update timeout. The
//! registry answers a plain GET with the alive server list in the
//! `X-Geerpc-Servers` response header, comma-joined.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use geerpc_common::http::REGISTRY_SERVERS_HEADER;
use geerpc_common::{Result, RpcError};

use crate::discovery::{Discovery, MultiServersDiscovery, SelectMode};

/// How long a fetched server list stays fresh by default.
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Discovery that keeps itself current against a registry endpoint.
pub struct RegistryDiscovery {
    servers: MultiServersDiscovery,
    registry: String,
    update_timeout: Duration,
    last_update: Mutex<Option<Instant>>,
    http: reqwest::Client,
}

impl RegistryDiscovery {
    /// `registry` is the registry's full URL, e.g.
    /// `http://127.0.0.1:9999/_geerpc_/registry`. A zero `update_timeout`
    /// falls back to the default.
    pub fn new(registry: impl Into<String>, update_timeout: Duration) -> Self {
        let update_timeout = if update_timeout.is_zero() {
            DEFAULT_UPDATE_TIMEOUT
        } else {
            update_timeout
        };
        Self {
            servers: MultiServersDiscovery::new(Vec::new()),
            registry: registry.into(),
            update_timeout,
            last_update: Mutex::new(None),
            http: reqwest::Client::new(),
        }
    }

    fn is_fresh(&self) -> bool {
        self.last_update
            .lock()
            .unwrap()
            .map(|at| at.elapsed() < self.update_timeout)
            .unwrap_or(false)
    }

    fn mark_updated(&self) {
        *self.last_update.lock().unwrap() = Some(Instant::now());
    }
}

#[async_trait]
impl Discovery for RegistryDiscovery {
    async fn refresh(&self) -> Result<()> {
        if self.is_fresh() {
            return Ok(());
        }
        debug!(registry = %self.registry, "rpc registry: refresh servers from registry");

        let response = self
            .http
            .get(&self.registry)
            .send()
            .await
            .map_err(|e| RpcError::Registry(format!("refresh err: {}", e)))?;
        let header = response
            .headers()
            .get(REGISTRY_SERVERS_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        let servers: Vec<String> = header
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        self.servers.update(servers).await?;
        self.mark_updated();
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) -> Result<()> {
        self.servers.update(servers).await?;
        self.mark_updated();
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String> {
        self.refresh().await?;
        self.servers.get(mode).await
    }

    async fn get_all(&self) -> Result<Vec<String>> {
        self.refresh().await?;
        self.servers.get_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_update_counts_as_fresh() {
        // Pointing at an unreachable registry: as long as the manual update
        // is fresh, no refresh is attempted and get_all succeeds.
        let d = RegistryDiscovery::new("http://127.0.0.1:1/_geerpc_/registry", Duration::from_secs(60));
        d.update(vec!["tcp@a".to_string(), "tcp@b".to_string()])
            .await
            .unwrap();
        assert_eq!(d.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stale_list_forces_refresh() {
        let d = RegistryDiscovery::new("http://127.0.0.1:1/_geerpc_/registry", Duration::from_millis(1));
        d.update(vec!["tcp@a".to_string()]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        // The registry is unreachable, so the forced refresh must fail.
        assert!(matches!(d.get_all().await, Err(RpcError::Registry(_))));
    }
}
