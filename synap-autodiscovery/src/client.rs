//! Cluster client
//!
//! Wires the discovery node, the server pool and the poller together.

use crate::config::ClusterClientConfig;
use crate::discovery::DiscoveryNode;
use crate::error::ClusterResult;
use crate::locator::{HashSlotLocatorFactory, LocatorFactory};
use crate::node::{Node, NodeFactory, TcpNodeFactory};
use crate::poller::ConfigurationPoller;
use crate::pool::AutoServerPool;
use crate::resolver::{DnsResolver, Resolver};
use crate::types::EngineVersion;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// Auto-discovering cluster client
///
/// # Example
///
/// ```no_run
/// use synap_autodiscovery::{ClusterClient, ClusterClientConfig};
///
/// # async fn example() -> synap_autodiscovery::ClusterResult<()> {
/// let config = ClusterClientConfig::new("mycluster.cfg.use1.cache.amazonaws.com", 11211);
/// let client = ClusterClient::connect(config).await?;
///
/// let node = client.locate("user:1001")?;
/// println!("user:1001 lives on {}", node.endpoint());
/// # Ok(())
/// # }
/// ```
pub struct ClusterClient {
    config: ClusterClientConfig,
    discovery: Arc<DiscoveryNode>,
    pool: AutoServerPool,
    poller: ConfigurationPoller,
}

/// Builder for [`ClusterClient`] with custom components
pub struct ClusterClientBuilder {
    config: ClusterClientConfig,
    node_factory: Arc<dyn NodeFactory>,
    locator_factory: Arc<dyn LocatorFactory>,
    resolver: Arc<dyn Resolver>,
}

impl ClusterClientBuilder {
    pub fn node_factory(mut self, factory: Arc<dyn NodeFactory>) -> Self {
        self.node_factory = factory;
        self
    }

    pub fn locator_factory(mut self, factory: Arc<dyn LocatorFactory>) -> Self {
        self.locator_factory = factory;
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Resolve the configuration endpoint, fetch the topology and start polling
    pub async fn connect(self) -> ClusterResult<ClusterClient> {
        let config = self.config;
        let endpoint = config.validate()?;

        let discovery = Arc::new(DiscoveryNode::new(
            endpoint,
            config.discovery.tries,
            config.delay(),
            config.socket_pool.clone(),
            Arc::clone(&self.node_factory),
            self.resolver,
        )?);

        discovery.resolve_endpoint().await?;
        let endpoints = discovery.get_endpoint_list().await?;

        let pool = AutoServerPool::new(
            config.socket_pool.clone(),
            self.node_factory,
            self.locator_factory,
        );
        pool.start(endpoints)?;

        let poller =
            ConfigurationPoller::new(Arc::clone(&discovery), pool.clone(), config.poll_interval());
        poller.start().await;

        info!(
            "Connected to cluster {} (version {}, {} nodes)",
            discovery.endpoint(),
            discovery.cluster_version(),
            pool.working_nodes().len()
        );

        Ok(ClusterClient {
            config,
            discovery,
            pool,
            poller,
        })
    }
}

impl ClusterClient {
    /// Connect with the TCP node factory, hash slot routing and system DNS
    pub async fn connect(config: ClusterClientConfig) -> ClusterResult<Self> {
        Self::builder(config).connect().await
    }

    pub fn builder(config: ClusterClientConfig) -> ClusterClientBuilder {
        ClusterClientBuilder {
            config,
            node_factory: Arc::new(TcpNodeFactory),
            locator_factory: Arc::new(HashSlotLocatorFactory),
            resolver: Arc::new(DnsResolver),
        }
    }

    pub fn config(&self) -> &ClusterClientConfig {
        &self.config
    }

    /// Node owning `key`
    pub fn locate(&self, key: &str) -> ClusterResult<Arc<dyn Node>> {
        self.pool.locate(key)
    }

    /// Nodes currently in rotation
    pub fn working_nodes(&self) -> Vec<Arc<dyn Node>> {
        self.pool.working_nodes()
    }

    pub fn cluster_version(&self) -> u64 {
        self.discovery.cluster_version()
    }

    /// Engine version of the cluster
    pub async fn node_version(&self) -> ClusterResult<EngineVersion> {
        self.discovery.node_version().await
    }

    /// Number of nodes the cluster last reported
    pub fn nodes_in_cluster(&self) -> usize {
        self.discovery.nodes_in_cluster()
    }

    pub fn resolved_endpoint(&self) -> Option<SocketAddr> {
        self.discovery.resolved_endpoint()
    }

    pub fn discovery(&self) -> &Arc<DiscoveryNode> {
        &self.discovery
    }

    pub fn pool(&self) -> &AutoServerPool {
        &self.pool
    }

    /// Force a topology refresh now
    pub async fn refresh(&self) {
        self.poller.poll_once().await;
    }

    pub fn subscribe_node_failures(&self) -> broadcast::Receiver<SocketAddr> {
        self.pool.subscribe_node_failures()
    }

    /// Stop polling and release every node. Idempotent.
    pub fn shutdown(&self) {
        self.poller.stop();
        self.pool.shutdown();
        self.discovery.shutdown();
    }
}

impl Drop for ClusterClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}
