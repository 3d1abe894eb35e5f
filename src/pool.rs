//! Per-endpoint client cache.

use parking_lot::Mutex;
use rand::seq::IndexedRandom;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::{debug, info};

use crate::{
    chains::ChainTarget,
    client::{AlloyChainClient, ChainClient},
    error::Result,
};

/// Builds a client for an endpoint, optionally through a proxy.
pub type Connector =
    dyn Fn(&ChainTarget, Option<&str>) -> Result<Arc<dyn ChainClient>> + Send + Sync;

/// Lazily creates one client per RPC endpoint and keeps it for the whole run.
/// Entries are never evicted; a dead endpoint shows up as call errors.
pub struct ConnectionPool {
    proxies: Vec<String>,
    connector: Box<Connector>,
    cache: Mutex<HashMap<String, Arc<dyn ChainClient>>>,
}

impl ConnectionPool {
    /// Pool of alloy HTTP clients with the given request timeout.
    pub fn new(proxies: Vec<String>, rpc_timeout: Duration) -> Self {
        Self::with_connector(proxies, move |chain, proxy| {
            let client = AlloyChainClient::connect(&chain.rpc_url, proxy, rpc_timeout)?;
            Ok(Arc::new(client) as Arc<dyn ChainClient>)
        })
    }

    pub fn with_connector<F>(proxies: Vec<String>, connector: F) -> Self
    where
        F: Fn(&ChainTarget, Option<&str>) -> Result<Arc<dyn ChainClient>> + Send + Sync + 'static,
    {
        if proxies.is_empty() {
            info!("Proxies disabled, connecting directly");
        } else {
            info!(count = proxies.len(), "Proxies enabled");
        }
        Self {
            proxies,
            connector: Box::new(connector),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached client for the chain's endpoint, creating it on first use.
    pub fn get_connection(&self, chain: &ChainTarget) -> Result<Arc<dyn ChainClient>> {
        let mut cache = self.cache.lock();
        if let Some(client) = cache.get(&chain.rpc_url) {
            return Ok(client.clone());
        }

        let proxy = self.pick_proxy();
        debug!(chain = %chain.name, proxied = proxy.is_some(), "Creating RPC client");
        let client = (self.connector)(chain, proxy)?;
        cache.insert(chain.rpc_url.clone(), client.clone());
        Ok(client)
    }

    /// A proxy chosen uniformly at random, or `None` when there are none.
    pub fn pick_proxy(&self) -> Option<&str> {
        self.proxies.choose(&mut rand::rng()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChain;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type SeenProxies = Arc<Mutex<Vec<Option<String>>>>;

    fn counting_pool(proxies: Vec<String>) -> (ConnectionPool, Arc<AtomicUsize>, SeenProxies) {
        let created = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (c, s) = (created.clone(), seen.clone());
        let pool = ConnectionPool::with_connector(proxies, move |chain, proxy| {
            c.fetch_add(1, Ordering::SeqCst);
            s.lock().push(proxy.map(str::to_string));
            Ok(Arc::new(MockChain::new(chain.chain_id)) as Arc<dyn ChainClient>)
        });
        (pool, created, seen)
    }

    #[test]
    fn caches_one_client_per_endpoint() {
        let (pool, created, _) = counting_pool(Vec::new());
        let base = ChainTarget::new("base", "http://base", 8453);
        let ink = ChainTarget::new("ink", "http://ink", 57073);

        let first = pool.get_connection(&base).unwrap();
        let second = pool.get_connection(&base).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        pool.get_connection(&ink).unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn binds_a_configured_proxy() {
        let proxies = vec!["http://a:1".to_string(), "http://b:2".to_string()];
        let (pool, _, seen) = counting_pool(proxies.clone());
        pool.get_connection(&ChainTarget::new("base", "http://base", 8453))
            .unwrap();
        let chosen = seen.lock()[0].clone().unwrap();
        assert!(proxies.contains(&chosen));
    }

    #[test]
    fn no_proxies_means_direct() {
        let (pool, _, seen) = counting_pool(Vec::new());
        assert!(pool.is_empty());
        pool.get_connection(&ChainTarget::new("base", "http://base", 8453))
            .unwrap();
        assert_eq!(seen.lock()[0], None);
    }
}
