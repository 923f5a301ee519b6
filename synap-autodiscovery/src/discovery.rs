//! Discovery Node
//!
//! Maintains the authoritative cluster topology by probing the cluster's
//! configuration endpoint:
//! - Resolves the discovery hostname (with retries)
//! - Reads the engine version once to pick `gets` or `config get`
//! - Fetches the cluster config from any probe node (with retries)
//! - Tracks the cluster version (never decreases)
//! - Keeps one probe node per reported endpoint

use crate::config::SocketPoolConfig;
use crate::error::{ClusterError, ClusterResult};
use crate::node::{Node, NodeFactory, Operation, dispose_quietly};
use crate::resolver::Resolver;
use crate::types::{
    ClusterConfigPayload, ClusterEndpoint, DiscoveryPhase, EngineVersion, parse_endpoint_list,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Probe nodes and resolution state, guarded together
struct ProbeSet {
    /// Address the discovery hostname resolved to
    resolved: Option<SocketAddr>,
    /// Node bound to the resolved address (used for `stats`)
    primary: Option<Arc<dyn Node>>,
    /// Nodes queried for the cluster config
    nodes: Vec<Arc<dyn Node>>,
    phase: DiscoveryPhase,
    disposed: bool,
}

impl ProbeSet {
    fn is_primary(&self, node: &Arc<dyn Node>) -> bool {
        self.primary
            .as_ref()
            .is_some_and(|primary| Arc::ptr_eq(primary, node))
    }

    /// Remove every probe, returning each distinct node once
    fn take_all(&mut self) -> Vec<Arc<dyn Node>> {
        let mut nodes: Vec<Arc<dyn Node>> = self.nodes.drain(..).collect();
        if let Some(primary) = self.primary.take() {
            if !nodes.iter().any(|n| Arc::ptr_eq(n, &primary)) {
                nodes.push(primary);
            }
        }
        nodes
    }
}

/// Discovers the endpoints of a cluster through its configuration endpoint
pub struct DiscoveryNode {
    endpoint: ClusterEndpoint,
    tries: u32,
    delay: Duration,
    socket_pool: SocketPoolConfig,
    node_factory: Arc<dyn NodeFactory>,
    resolver: Arc<dyn Resolver>,
    cluster_version: AtomicU64,
    engine_version: OnceCell<EngineVersion>,
    probes: Mutex<ProbeSet>,
}

impl DiscoveryNode {
    /// Create a discovery node. Nothing is resolved until [`resolve_endpoint`](Self::resolve_endpoint).
    pub fn new(
        endpoint: ClusterEndpoint,
        tries: u32,
        delay: Duration,
        socket_pool: SocketPoolConfig,
        node_factory: Arc<dyn NodeFactory>,
        resolver: Arc<dyn Resolver>,
    ) -> ClusterResult<Self> {
        if tries == 0 {
            return Err(ClusterError::Config("must try at least once".to_string()));
        }

        Ok(Self {
            endpoint,
            tries,
            delay,
            socket_pool,
            node_factory,
            resolver,
            cluster_version: AtomicU64::new(0),
            engine_version: OnceCell::new(),
            probes: Mutex::new(ProbeSet {
                resolved: None,
                primary: None,
                nodes: Vec::new(),
                phase: DiscoveryPhase::Resolving,
                disposed: false,
            }),
        })
    }

    /// Configuration endpoint this node discovers through
    pub fn endpoint(&self) -> &ClusterEndpoint {
        &self.endpoint
    }

    /// Latest cluster version seen (0 before the first successful fetch)
    pub fn cluster_version(&self) -> u64 {
        self.cluster_version.load(Ordering::SeqCst)
    }

    /// Engine version, once it has been read
    pub fn engine_version(&self) -> Option<EngineVersion> {
        self.engine_version.get().copied()
    }

    /// Number of probe nodes (one per reported cluster node)
    pub fn nodes_in_cluster(&self) -> usize {
        self.probes.lock().nodes.len()
    }

    pub fn resolved_endpoint(&self) -> Option<SocketAddr> {
        self.probes.lock().resolved
    }

    pub fn phase(&self) -> DiscoveryPhase {
        self.probes.lock().phase
    }

    fn set_phase(&self, phase: DiscoveryPhase) {
        let mut probes = self.probes.lock();
        if probes.phase != phase {
            debug!("Discovery phase {:?} -> {:?}", probes.phase, phase);
            probes.phase = phase;
        }
    }

    fn ensure_open(&self) -> ClusterResult<()> {
        if self.probes.lock().disposed {
            return Err(ClusterError::Disposed);
        }
        Ok(())
    }

    /// Resolve the discovery hostname and bind a fresh probe node to it
    ///
    /// Replaces (and disposes) every existing probe node.
    pub async fn resolve_endpoint(&self) -> ClusterResult<SocketAddr> {
        self.ensure_open()?;
        self.set_phase(DiscoveryPhase::Resolving);

        let hostname = self.endpoint.hostname();
        let port = self.endpoint.port();
        let mut message = String::new();
        let mut resolved = None;

        for attempt in 1..=self.tries {
            match self.resolver.resolve(hostname, port).await {
                Ok(addrs) if !addrs.is_empty() => {
                    resolved = Some(addrs[0]);
                    break;
                }
                Ok(_) => message = format!("no addresses found for {}", hostname),
                Err(e) => message = e.to_string(),
            }

            debug!(
                "Resolution attempt {}/{} for {} failed: {}",
                attempt, self.tries, hostname, message
            );
            if attempt < self.tries {
                sleep(self.delay).await;
            }
        }

        let Some(addr) = resolved else {
            error!("Could not resolve {} to an IP address", hostname);
            return Err(ClusterError::Resolution {
                hostname: hostname.to_string(),
                tries: self.tries,
                message,
            });
        };

        debug!("Resolved configuration endpoint {} to {}", hostname, addr);

        let node = self.node_factory.create_node(addr, &self.socket_pool);
        let retired = {
            let mut probes = self.probes.lock();
            if probes.disposed {
                None
            } else {
                let retired = probes.take_all();
                probes.resolved = Some(addr);
                probes.primary = Some(Arc::clone(&node));
                probes.nodes = vec![node.clone()];
                probes.phase = DiscoveryPhase::Probing;
                Some(retired)
            }
        };

        let Some(retired) = retired else {
            // Shut down while resolving
            dispose_quietly(&node);
            return Err(ClusterError::Disposed);
        };

        for node in retired {
            dispose_quietly(&node);
        }

        Ok(addr)
    }

    /// Engine version from `stats`, fetched once per lifetime
    pub async fn node_version(&self) -> ClusterResult<EngineVersion> {
        let version = self
            .engine_version
            .get_or_try_init(|| async move {
                let primary = self.probes.lock().primary.clone();
                let Some(primary) = primary else {
                    return Err(ClusterError::NoReachableNode);
                };

                let result = primary.execute(&Operation::Stats).await?;
                match result.stats().and_then(|stats| stats.get("version")) {
                    Some(raw) => {
                        let version = EngineVersion::parse(raw)?;
                        info!("Cluster engine version is {}", version);
                        Ok(version)
                    }
                    None => {
                        error!("Could not call stats on node {}", primary.endpoint());
                        Err(ClusterError::UnsupportedCommand(
                            "the node does not have a version in stats".to_string(),
                        ))
                    }
                }
            })
            .await?;

        Ok(*version)
    }

    /// Fetch the cluster config from the probe nodes
    ///
    /// Every attempt asks each probe in turn; the next attempt starts after
    /// `delay` once all of them failed. Raises the cluster version to the
    /// reported one.
    pub async fn get_node_config(&self) -> ClusterResult<ClusterConfigPayload> {
        self.ensure_open()?;

        let version = self.node_version().await?;
        let op = if version.supports_config_get() {
            Operation::config()
        } else {
            Operation::legacy_config()
        };

        self.set_phase(DiscoveryPhase::Probing);
        let mut message = String::new();

        for attempt in 1..=self.tries {
            let probes = self.probes.lock().nodes.clone();
            if probes.is_empty() {
                message = "no probe nodes available".to_string();
            }

            for probe in probes {
                match probe.execute(&op).await {
                    Ok(result) if result.success => {
                        let Some(data) = result.value() else {
                            message = "response carried no config".to_string();
                            continue;
                        };

                        match ClusterConfigPayload::parse(&String::from_utf8_lossy(data)) {
                            Ok(payload) => {
                                self.observe_version(payload.version);
                                self.set_phase(DiscoveryPhase::Ready);
                                return Ok(payload);
                            }
                            Err(e) => {
                                warn!("Probe {} returned an invalid config: {}", probe.endpoint(), e);
                                message = e.to_string();
                            }
                        }
                    }
                    Ok(result) => message = result.message,
                    Err(e) => {
                        debug!("Probe {} failed: {}", probe.endpoint(), e);
                        message = e.to_string();
                    }
                }
            }

            debug!(
                "Config attempt {}/{} failed: {}",
                attempt, self.tries, message
            );
            if attempt < self.tries {
                sleep(self.delay).await;
            }
        }

        self.set_phase(DiscoveryPhase::Resolving);
        Err(ClusterError::DiscoveryTimeout {
            engine_version: version.to_string(),
            tries: self.tries,
            delay_ms: self.delay.as_millis() as u64,
            message,
        })
    }

    fn observe_version(&self, reported: u64) {
        let previous = self.cluster_version.fetch_max(reported, Ordering::SeqCst);
        if reported > previous {
            info!("Cluster version changed {} -> {}", previous, reported);
        } else if reported < previous {
            warn!(
                "Ignoring stale cluster version {} (current {})",
                reported, previous
            );
        }
    }

    /// Fetch the config and sync the probe set with the reported endpoints
    pub async fn get_endpoint_list(&self) -> ClusterResult<Vec<SocketAddr>> {
        let payload = match self.get_node_config().await {
            Ok(payload) => payload,
            Err(e) => {
                error!("Error getting endpoints list: {}", e);
                return Err(e);
            }
        };

        let endpoints = parse_endpoint_list(&payload.endpoints);

        let retired = {
            let mut probes = self.probes.lock();
            if probes.disposed {
                return Err(ClusterError::Disposed);
            }

            let (kept, removed): (Vec<_>, Vec<_>) = std::mem::take(&mut probes.nodes)
                .into_iter()
                .partition(|n| endpoints.contains(&n.endpoint()));
            probes.nodes = kept;

            for endpoint in &endpoints {
                if !probes.nodes.iter().any(|n| n.endpoint() == *endpoint) {
                    let node = self.node_factory.create_node(*endpoint, &self.socket_pool);
                    probes.nodes.push(node);
                }
            }

            // The primary probe stays owned until the next resolution
            removed
                .into_iter()
                .filter(|n| !probes.is_primary(n))
                .collect::<Vec<_>>()
        };

        for node in retired {
            dispose_quietly(&node);
        }

        debug!(
            "Cluster reports {} endpoints (version {})",
            endpoints.len(),
            self.cluster_version()
        );
        Ok(endpoints)
    }

    /// Dispose every probe node. Idempotent.
    pub fn shutdown(&self) {
        let nodes = {
            let mut probes = self.probes.lock();
            if probes.disposed {
                return;
            }
            probes.disposed = true;
            probes.take_all()
        };

        for node in nodes {
            dispose_quietly(&node);
        }
        debug!("Discovery node for {} shut down", self.endpoint);
    }
}

impl Drop for DiscoveryNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}
