//! In-memory server registry with lazy eviction.
//!
//! Servers keep themselves registered by POSTing their address periodically;
//! an entry whose last heartbeat is older than the eviction timeout is
//! dropped the next time the list is read. Reading through the map instead
//! of running a background sweeper keeps the registry a single mutex-guarded
//! `HashMap`.
//!
//! # HTTP protocol
//!
//! One endpoint (default `/_geerpc_/registry`):
//!
//! - `GET`: responds with the sorted, comma-joined alive addresses in the
//!   `X-Geerpc-Servers` header
//! - `POST`: upserts the address given in the `X-Geerpc-Server` header;
//!   `500` when the header is missing
//! - anything else: `405`

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{debug, info};

use geerpc_common::http::{DEFAULT_REGISTRY_PATH, REGISTRY_SERVERS_HEADER, REGISTRY_SERVER_HEADER};
use geerpc_common::Result;

/// Default eviction timeout (5 minutes).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Tracks live server addresses by last-heartbeat time.
pub struct Registry {
    timeout: Duration,
    servers: Mutex<HashMap<String, Instant>>,
}

impl Registry {
    /// A zero `timeout` disables eviction entirely.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            servers: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts a server or refreshes its heartbeat time.
    pub fn put_server(&self, addr: &str) {
        let mut servers = self.servers.lock().unwrap();
        servers.insert(addr.to_string(), Instant::now());
        debug!(addr, "rpc registry: heartbeat");
    }

    /// Returns the sorted alive addresses, evicting stale entries as it
    /// scans.
    pub fn alive_servers(&self) -> Vec<String> {
        let mut servers = self.servers.lock().unwrap();
        let now = Instant::now();
        let timeout = self.timeout;

        let mut alive = Vec::with_capacity(servers.len());
        servers.retain(|addr, last_seen| {
            if timeout.is_zero() || *last_seen + timeout > now {
                alive.push(addr.clone());
                true
            } else {
                debug!(addr, "rpc registry: evicting stale server");
                false
            }
        });
        alive.sort();
        alive
    }

    /// Builds the HTTP router serving this registry at the default path.
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route(DEFAULT_REGISTRY_PATH, any(handle))
            .with_state(Arc::clone(self))
    }

    /// Serves the registry on a listener until shutdown.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(
            path = DEFAULT_REGISTRY_PATH,
            addr = %listener.local_addr()?,
            "rpc registry: serving"
        );
        let app = self.router();
        axum::serve(listener, app).await?;
        Ok(())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

async fn handle(
    State(registry): State<Arc<Registry>>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    match method {
        Method::GET => {
            let alive = registry.alive_servers().join(",");
            let mut response_headers = HeaderMap::new();
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(REGISTRY_SERVERS_HEADER.as_bytes()),
                HeaderValue::from_str(&alive),
            ) {
                response_headers.insert(name, value);
            }
            (StatusCode::OK, response_headers).into_response()
        }
        Method::POST => match headers.get(REGISTRY_SERVER_HEADER).and_then(|v| v.to_str().ok()) {
            Some(addr) if !addr.is_empty() => {
                registry.put_server(addr);
                StatusCode::OK.into_response()
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        },
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}
