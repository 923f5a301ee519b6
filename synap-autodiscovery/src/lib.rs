//! # Synap Auto-Discovery
//!
//! Cluster auto-discovery and dynamic routing for memcached-compatible
//! cache clusters (ElastiCache style configuration endpoints).
//!
//! ## Features
//!
//! - **Discovery**: Resolves the `.cfg` configuration endpoint and reads the cluster config
//! - **Engine detection**: Uses `config get cluster` on 1.4.14+, `gets` on older engines
//! - **Dynamic routing**: Publishes immutable routing generations as nodes join and leave
//! - **Failure handling**: Dead nodes leave rotation immediately and are pinged back in
//! - **Polling**: Refreshes the topology in the background, degrading to no nodes on failure
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use synap_autodiscovery::{ClusterClient, ClusterClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClusterClientConfig::new("mycluster.cfg.use1.cache.amazonaws.com", 11211)
//!         .with_poll_interval(Duration::from_secs(30));
//!     let client = ClusterClient::connect(config).await?;
//!
//!     let node = client.locate("user:1001")?;
//!     println!("cluster v{} routes user:1001 to {}", client.cluster_version(), node.endpoint());
//!
//!     client.shutdown();
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod locator;
pub mod node;
pub mod poller;
pub mod pool;
pub mod protocol;
pub mod resolver;
pub mod types;

pub use client::{ClusterClient, ClusterClientBuilder};
pub use config::{ClusterClientConfig, SocketPoolConfig};
pub use discovery::DiscoveryNode;
pub use error::{ClusterError, ClusterResult};
pub use locator::{HashSlotLocator, HashSlotLocatorFactory, LocatorFactory, NodeLocator};
pub use node::{
    FailureNotifier, Node, NodeFactory, Operation, OperationData, OperationResult, TcpNode,
    TcpNodeFactory,
};
pub use poller::ConfigurationPoller;
pub use pool::{AutoServerPool, RoutingGeneration};
pub use resolver::{DnsResolver, Resolver};
pub use types::{
    ClusterConfigPayload, ClusterEndpoint, DiscoveryPhase, EngineVersion, parse_endpoint_list,
};
