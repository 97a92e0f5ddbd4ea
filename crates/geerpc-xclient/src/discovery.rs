//! Server-set discovery.
//!
//! A [`Discovery`] yields the currently known server addresses, either one
//! at a time through a [`SelectMode`] or all at once for broadcast fan-out.
//! [`MultiServersDiscovery`] is the registry-less implementation: the caller
//! supplies the list and keeps it current with [`update`](Discovery::update).

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::RwLock;

use geerpc_common::{Result, RpcError};

/// How [`Discovery::get`] picks one server from the current list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    /// Uniformly random over the current list
    Random,
    /// Advance an index modulo the current list length
    RoundRobin,
}

/// A source of RPC server addresses.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Re-fetches the list from its upstream source, if it has one.
    async fn refresh(&self) -> Result<()>;

    /// Replaces the server list.
    async fn update(&self, servers: Vec<String>) -> Result<()>;

    /// Picks one server according to `mode`.
    async fn get(&self, mode: SelectMode) -> Result<String>;

    /// Returns a copy of the full list.
    async fn get_all(&self) -> Result<Vec<String>>;
}

struct Listing {
    servers: Vec<String>,
    index: usize,
}

/// Discovery over an explicitly provided server list.
pub struct MultiServersDiscovery {
    listing: RwLock<Listing>,
}

impl MultiServersDiscovery {
    /// The round-robin index starts at a random offset so a fleet of clients
    /// does not converge on the same first server.
    pub fn new(servers: Vec<String>) -> Self {
        let index = rand::thread_rng().gen_range(0..u32::MAX as usize);
        Self {
            listing: RwLock::new(Listing { servers, index }),
        }
    }
}

#[async_trait]
impl Discovery for MultiServersDiscovery {
    /// Meaningless without an upstream source; a no-op.
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) -> Result<()> {
        self.listing.write().await.servers = servers;
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String> {
        let mut listing = self.listing.write().await;
        let n = listing.servers.len();
        if n == 0 {
            return Err(RpcError::NoAvailableServers);
        }
        match mode {
            SelectMode::Random => {
                let pick = rand::thread_rng().gen_range(0..n);
                Ok(listing.servers[pick].clone())
            }
            SelectMode::RoundRobin => {
                // The list may have shrunk since the last pick; mod n keeps
                // the index in range either way.
                let server = listing.servers[listing.index % n].clone();
                listing.index = (listing.index + 1) % n;
                Ok(server)
            }
        }
    }

    async fn get_all(&self) -> Result<Vec<String>> {
        let listing = self.listing.read().await;
        Ok(listing.servers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn addrs(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("tcp@server-{}", i)).collect()
    }

    #[tokio::test]
    async fn test_round_robin_visits_each_server_once() {
        let servers = addrs(3);
        let d = MultiServersDiscovery::new(servers.clone());

        let mut seen = HashSet::new();
        for _ in 0..3 {
            seen.insert(d.get(SelectMode::RoundRobin).await.unwrap());
        }
        assert_eq!(seen, servers.into_iter().collect::<HashSet<_>>());
    }

    #[tokio::test]
    async fn test_round_robin_wraps() {
        let d = MultiServersDiscovery::new(addrs(2));
        let first = d.get(SelectMode::RoundRobin).await.unwrap();
        let _ = d.get(SelectMode::RoundRobin).await.unwrap();
        let third = d.get(SelectMode::RoundRobin).await.unwrap();
        assert_eq!(first, third);
    }

    #[tokio::test]
    async fn test_random_picks_from_list() {
        let servers = addrs(3);
        let d = MultiServersDiscovery::new(servers.clone());
        for _ in 0..20 {
            let pick = d.get(SelectMode::Random).await.unwrap();
            assert!(servers.contains(&pick));
        }
    }

    #[tokio::test]
    async fn test_empty_list_has_no_servers() {
        let d = MultiServersDiscovery::new(Vec::new());
        assert!(matches!(
            d.get(SelectMode::Random).await,
            Err(RpcError::NoAvailableServers)
        ));
        assert!(matches!(
            d.get(SelectMode::RoundRobin).await,
            Err(RpcError::NoAvailableServers)
        ));
    }

    #[tokio::test]
    async fn test_update_replaces_list() {
        let d = MultiServersDiscovery::new(addrs(2));
        d.update(vec!["tcp@fresh".to_string()]).await.unwrap();
        assert_eq!(d.get_all().await.unwrap(), vec!["tcp@fresh".to_string()]);
        assert_eq!(
            d.get(SelectMode::RoundRobin).await.unwrap(),
            "tcp@fresh".to_string()
        );
    }

    #[tokio::test]
    async fn test_get_all_returns_a_copy() {
        let d = MultiServersDiscovery::new(addrs(2));
        let mut copy = d.get_all().await.unwrap();
        copy.push("tcp@rogue".to_string());
        assert_eq!(d.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_round_robin_tolerates_shrinking_list() {
        let d = MultiServersDiscovery::new(addrs(5));
        for _ in 0..4 {
            d.get(SelectMode::RoundRobin).await.unwrap();
        }
        d.update(addrs(2)).await.unwrap();
        // Index may be out of range for the new list; get must still work.
        let pick = d.get(SelectMode::RoundRobin).await.unwrap();
        assert!(addrs(2).contains(&pick));
    }
}
