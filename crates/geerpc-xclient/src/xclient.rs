//! Load-balancing client.
//!
//! An [`XClient`] fronts a fleet of servers behind a [`Discovery`]. Single
//! calls pick one server via the select mode; [`broadcast`](XClient::broadcast)
//! fans a call out to every known server. Underlying connections are cached
//! per address and redialed when a cached client reports unavailable.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::debug;

use geerpc_client::{x_dial, Client};
use geerpc_common::{Options, Result, RpcError};

use crate::discovery::{Discovery, SelectMode};

struct Inner {
    discovery: Arc<dyn Discovery>,
    mode: SelectMode,
    opt: Options,
    clients: Mutex<HashMap<String, Arc<Client>>>,
}

/// A client that spreads calls over the servers a [`Discovery`] knows about.
///
/// Cloning is cheap and shares the connection cache.
pub struct XClient {
    inner: Arc<Inner>,
}

impl Clone for XClient {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl XClient {
    pub fn new(discovery: Arc<dyn Discovery>, mode: SelectMode, opt: Options) -> Self {
        Self {
            inner: Arc::new(Inner {
                discovery,
                mode,
                opt,
                clients: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Calls one server chosen by the select mode.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let rpc_addr = self.inner.discovery.get(self.inner.mode).await?;
        let client = self.dial_cached(&rpc_addr).await?;
        client.call(service_method, args).await
    }

    /// Fans the call out to every known server, fail-fast.
    ///
    /// Each branch decodes into its own fresh reply, so branches never race
    /// on shared state. The first error aborts the branches still in flight.
    /// The returned result is whichever decisive event arrived first: a
    /// successful reply, or an error.
    pub async fn broadcast<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        self.broadcast_inner(service_method, args, Duration::ZERO).await
    }

    /// [`broadcast`](Self::broadcast) with a per-branch deadline, so one
    /// unresponsive server cannot stall the fan-out indefinitely.
    pub async fn broadcast_timeout<A, R>(
        &self,
        service_method: &str,
        args: &A,
        timeout: Duration,
    ) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        self.broadcast_inner(service_method, args, timeout).await
    }

    async fn broadcast_inner<A, R>(
        &self,
        service_method: &str,
        args: &A,
        timeout: Duration,
    ) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let servers = self.inner.discovery.get_all().await?;
        if servers.is_empty() {
            return Err(RpcError::NoAvailableServers);
        }

        // Encode once; every branch sends the same payload.
        let payload = self.inner.opt.codec_type.encode(args)?;

        let mut branches = JoinSet::new();
        for rpc_addr in servers {
            let xc = self.clone();
            let service_method = service_method.to_string();
            let payload = payload.clone();
            branches.spawn(async move {
                let client = xc.dial_cached(&rpc_addr).await?;
                if timeout.is_zero() {
                    client.call_raw(&service_method, payload).await
                } else {
                    match tokio::time::timeout(timeout, client.call_raw(&service_method, payload))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(RpcError::CallTimeout(timeout)),
                    }
                }
            });
        }

        let mut first_success: Option<Vec<u8>> = None;
        let mut first_error: Option<RpcError> = None;
        let mut success_came_first = false;

        while let Some(joined) = branches.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => Err(RpcError::Server(e.to_string())),
            };
            match result {
                Ok(reply) => {
                    if first_success.is_none() {
                        success_came_first = first_error.is_none();
                        first_success = Some(reply);
                    }
                }
                Err(e) => {
                    if first_error.is_none() {
                        debug!(error = %e, "rpc xclient: broadcast branch failed, cancelling the rest");
                        first_error = Some(e);
                        branches.abort_all();
                    }
                }
            }
        }

        match (first_success, first_error) {
            (Some(reply), None) => self.inner.opt.codec_type.decode(&reply),
            (Some(reply), Some(_)) if success_came_first => {
                self.inner.opt.codec_type.decode(&reply)
            }
            (_, Some(e)) => Err(e),
            (None, None) => Err(RpcError::NoAvailableServers),
        }
    }

    /// Returns the cached client for an address, evicting and redialing if
    /// the cached one is no longer usable.
    async fn dial_cached(&self, rpc_addr: &str) -> Result<Arc<Client>> {
        let mut clients = self.inner.clients.lock().await;
        if let Some(client) = clients.get(rpc_addr) {
            if client.is_available() {
                return Ok(Arc::clone(client));
            }
            if let Some(stale) = clients.remove(rpc_addr) {
                let _ = stale.close().await;
            }
        }

        let client = Arc::new(x_dial(rpc_addr, self.inner.opt.clone()).await?);
        clients.insert(rpc_addr.to_string(), Arc::clone(&client));
        Ok(client)
    }

    /// Closes and evicts every cached client.
    pub async fn close(&self) {
        let mut clients = self.inner.clients.lock().await;
        for (_, client) in clients.drain() {
            let _ = client.close().await;
        }
    }
}
