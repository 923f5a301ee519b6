//! Auto Server Pool
//!
//! Owns the node registry and the published routing generation:
//! - Publishes a new immutable routing generation on every topology change
//! - Takes failed nodes out of rotation as soon as they report
//! - Pings dead nodes every `dead_timeout` until they come back
//! - Disposes nodes that leave the cluster, exactly once

use crate::config::SocketPoolConfig;
use crate::error::{ClusterError, ClusterResult};
use crate::locator::{LocatorFactory, NodeLocator};
use crate::node::{FailureNotifier, Node, NodeFactory, dispose_quietly};
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Capacity of the node failure broadcast
const FAILURE_EVENTS_CAPACITY: usize = 64;

/// One published routing object
///
/// Readers load the current generation atomically; a generation never
/// changes after it is published.
pub struct RoutingGeneration {
    generation: u64,
    locator: Box<dyn NodeLocator>,
}

impl RoutingGeneration {
    /// Monotonic generation number (1 for the first publication)
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn locate(&self, key: &str) -> Option<Arc<dyn Node>> {
        self.locator.locate(key)
    }

    pub fn working_nodes(&self) -> Vec<Arc<dyn Node>> {
        self.locator.working_nodes()
    }
}

/// Registry and background task bookkeeping
struct PoolState {
    /// Every node the pool owns, alive or dead
    nodes: Vec<Arc<dyn Node>>,
    next_generation: u64,
    /// Resurrection timer is scheduled
    timer_active: bool,
    resurrect_task: Option<JoinHandle<()>>,
    failure_worker: Option<JoinHandle<()>>,
    started: bool,
    disposed: bool,
}

struct PoolInner {
    socket_pool: SocketPoolConfig,
    node_factory: Arc<dyn NodeFactory>,
    locator_factory: Arc<dyn LocatorFactory>,
    routing: ArcSwapOption<RoutingGeneration>,
    state: Mutex<PoolState>,
    notifier: FailureNotifier,
    failures: broadcast::Sender<SocketAddr>,
    runtime: Handle,
}

/// Server pool that follows the cluster topology
///
/// Cheap to clone; all clones share the same registry.
#[derive(Clone)]
pub struct AutoServerPool {
    inner: Arc<PoolInner>,
}

impl AutoServerPool {
    /// Create an empty pool. Must be called from within a tokio runtime.
    pub fn new(
        socket_pool: SocketPoolConfig,
        node_factory: Arc<dyn NodeFactory>,
        locator_factory: Arc<dyn LocatorFactory>,
    ) -> Self {
        let (notifier, failure_rx) = FailureNotifier::channel();
        let (failures, _) = broadcast::channel(FAILURE_EVENTS_CAPACITY);

        let inner = Arc::new(PoolInner {
            socket_pool,
            node_factory,
            locator_factory,
            routing: ArcSwapOption::empty(),
            state: Mutex::new(PoolState {
                nodes: Vec::new(),
                next_generation: 0,
                timer_active: false,
                resurrect_task: None,
                failure_worker: None,
                started: false,
                disposed: false,
            }),
            notifier,
            failures,
            runtime: Handle::current(),
        });

        let worker = inner
            .runtime
            .spawn(failure_worker(Arc::downgrade(&inner), failure_rx));
        inner.state.lock().failure_worker = Some(worker);

        Self { inner }
    }

    /// Register the bootstrap servers and publish the first generation
    pub fn start(&self, servers: Vec<SocketAddr>) -> ClusterResult<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if state.disposed {
            return Err(ClusterError::Disposed);
        }
        if state.started {
            return Err(ClusterError::Config("server pool already started".to_string()));
        }

        let nodes: Vec<Arc<dyn Node>> = dedup(servers)
            .into_iter()
            .map(|endpoint| inner.register(endpoint))
            .collect();

        info!("Starting server pool with {} servers", nodes.len());
        state.nodes = nodes.clone();
        state.started = true;
        inner.publish(&mut state, nodes);
        Ok(())
    }

    /// Node owning `key` in the current generation
    pub fn locate(&self, key: &str) -> ClusterResult<Arc<dyn Node>> {
        let routing = self.inner.routing.load();
        match &*routing {
            Some(generation) => generation.locate(key).ok_or(ClusterError::NoReachableNode),
            None => Err(ClusterError::NoReachableNode),
        }
    }

    /// Alive nodes of the current generation
    pub fn working_nodes(&self) -> Vec<Arc<dyn Node>> {
        let routing = self.inner.routing.load();
        match &*routing {
            Some(generation) => generation.working_nodes(),
            None => Vec::new(),
        }
    }

    /// Currently published routing generation
    pub fn current_generation(&self) -> Option<Arc<RoutingGeneration>> {
        self.inner.routing.load_full()
    }

    /// Every registered node, alive or dead
    pub fn registered_nodes(&self) -> Vec<Arc<dyn Node>> {
        self.inner.state.lock().nodes.clone()
    }

    /// Registered nodes waiting for resurrection
    pub fn dead_nodes(&self) -> Vec<Arc<dyn Node>> {
        self.inner
            .state
            .lock()
            .nodes
            .iter()
            .filter(|n| !n.is_alive())
            .cloned()
            .collect()
    }

    pub fn is_resurrection_scheduled(&self) -> bool {
        self.inner.state.lock().timer_active
    }

    /// Receive the endpoint of every node the pool takes out of rotation
    pub fn subscribe_node_failures(&self) -> broadcast::Receiver<SocketAddr> {
        self.inner.failures.subscribe()
    }

    /// Replace the registry with the given endpoints
    ///
    /// Existing nodes are reused; dead ones stay registered but are left out
    /// of routing until resurrected. Nodes no longer listed are disposed
    /// after the new generation is published.
    pub fn update_locator(&self, endpoints: Vec<SocketAddr>) -> ClusterResult<()> {
        let inner = &self.inner;

        let retired = {
            let mut state = inner.state.lock();
            if state.disposed {
                return Err(ClusterError::Disposed);
            }

            let mut alive: Vec<Arc<dyn Node>> = Vec::with_capacity(endpoints.len());
            let mut dead: Vec<Arc<dyn Node>> = Vec::new();

            for endpoint in dedup(endpoints) {
                let existing = state
                    .nodes
                    .iter()
                    .find(|n| n.endpoint() == endpoint)
                    .cloned();

                match existing {
                    Some(node) if node.is_alive() => alive.push(node),
                    Some(node) => dead.push(node),
                    None => alive.push(inner.register(endpoint)),
                }
            }

            let registry: Vec<Arc<dyn Node>> = alive.iter().chain(dead.iter()).cloned().collect();
            let retired: Vec<Arc<dyn Node>> = state
                .nodes
                .iter()
                .filter(|n| !registry.iter().any(|r| Arc::ptr_eq(r, *n)))
                .cloned()
                .collect();

            info!(
                "Updating locator: {} alive, {} dead, {} removed",
                alive.len(),
                dead.len(),
                retired.len()
            );

            state.nodes = registry;
            inner.publish(&mut state, alive);
            if !dead.is_empty() {
                inner.schedule_resurrection(&mut state);
            }

            retired
        };

        for node in retired {
            dispose_quietly(&node);
        }
        Ok(())
    }

    /// Dispose every node and stop background tasks. Idempotent.
    pub fn shutdown(&self) {
        self.inner.dispose();
    }
}

impl PoolInner {
    fn register(&self, endpoint: SocketAddr) -> Arc<dyn Node> {
        let node = self.node_factory.create_node(endpoint, &self.socket_pool);
        node.subscribe_failures(self.notifier.clone());
        node
    }

    /// Build a locator over `alive` and swap it in
    fn publish(&self, state: &mut PoolState, alive: Vec<Arc<dyn Node>>) {
        let mut locator = self.locator_factory.create();
        locator.initialize(alive);

        state.next_generation += 1;
        let generation = state.next_generation;
        self.routing.store(Some(Arc::new(RoutingGeneration {
            generation,
            locator,
        })));
        debug!("Published routing generation {}", generation);
    }

    fn routing_matches(&self, alive: &[Arc<dyn Node>]) -> bool {
        let current: HashSet<SocketAddr> = match &*self.routing.load() {
            Some(generation) => generation
                .working_nodes()
                .iter()
                .map(|n| n.endpoint())
                .collect(),
            None => return alive.is_empty(),
        };
        let next: HashSet<SocketAddr> = alive.iter().map(|n| n.endpoint()).collect();
        current == next
    }

    fn node_failed(self: &Arc<Self>, endpoint: SocketAddr) {
        let mut state = self.state.lock();
        if state.disposed {
            warn!("Got a node failure for {} but the pool is already disposed", endpoint);
            return;
        }
        if !state.nodes.iter().any(|n| n.endpoint() == endpoint) {
            debug!("Ignoring failure of unregistered node {}", endpoint);
            return;
        }

        warn!("Node {} is dead, removing it from rotation", endpoint);

        let alive: Vec<Arc<dyn Node>> = state
            .nodes
            .iter()
            .filter(|n| n.endpoint() != endpoint && n.is_alive())
            .cloned()
            .collect();
        self.publish(&mut state, alive);
        self.schedule_resurrection(&mut state);

        // No subscribers is fine
        let _ = self.failures.send(endpoint);
    }

    fn schedule_resurrection(self: &Arc<Self>, state: &mut PoolState) {
        if state.timer_active {
            return;
        }

        let dead_timeout = self.socket_pool.dead_timeout();
        debug!("Scheduling resurrection in {:?}", dead_timeout);

        let pool = Arc::downgrade(self);
        state.timer_active = true;
        state.resurrect_task = Some(self.runtime.spawn(async move {
            sleep(dead_timeout).await;
            if let Some(pool) = pool.upgrade() {
                pool.resurrect().await;
            }
        }));
    }

    async fn resurrect(self: Arc<Self>) {
        debug!("Checking the dead servers");

        let dead: Vec<Arc<dyn Node>> = {
            let state = self.state.lock();
            if state.disposed {
                return;
            }
            state
                .nodes
                .iter()
                .filter(|n| !n.is_alive())
                .cloned()
                .collect()
        };

        // Pings run without holding the lock
        for node in &dead {
            if node.ping().await {
                debug!("Node {} answered, bringing it back", node.endpoint());
            } else {
                debug!("Node {} is still dead", node.endpoint());
            }
        }

        let mut state = self.state.lock();
        if state.disposed {
            return;
        }

        // Liveness is re-read under the lock: a node may fail again after answering
        let mut alive = Vec::with_capacity(state.nodes.len());
        let mut still_dead = 0;
        for node in &state.nodes {
            if node.is_alive() {
                alive.push(Arc::clone(node));
            } else {
                still_dead += 1;
            }
        }

        if !self.routing_matches(&alive) {
            info!("Reinitializing the locator with {} nodes", alive.len());
            self.publish(&mut state, alive);
        }

        state.timer_active = false;
        state.resurrect_task = None;
        if still_dead > 0 {
            self.schedule_resurrection(&mut state);
        } else {
            debug!("Every node is alive, stopping the resurrection timer");
        }
    }

    fn dispose(&self) {
        let (routing, nodes, tasks) = {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.timer_active = false;
            (
                self.routing.swap(None),
                std::mem::take(&mut state.nodes),
                [state.resurrect_task.take(), state.failure_worker.take()],
            )
        };

        if let Some(routing) = routing {
            routing.locator.dispose();
        }
        for node in &nodes {
            dispose_quietly(node);
        }
        for task in tasks.into_iter().flatten() {
            task.abort();
        }

        info!("Server pool disposed ({} nodes)", nodes.len());
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Forward node failure signals to the pool while it exists
async fn failure_worker(pool: Weak<PoolInner>, mut rx: mpsc::UnboundedReceiver<SocketAddr>) {
    while let Some(endpoint) = rx.recv().await {
        let Some(pool) = pool.upgrade() else {
            break;
        };
        pool.node_failed(endpoint);
    }
}

fn dedup(endpoints: Vec<SocketAddr>) -> Vec<SocketAddr> {
    let mut seen = HashSet::with_capacity(endpoints.len());
    endpoints.into_iter().filter(|e| seen.insert(*e)).collect()
}
