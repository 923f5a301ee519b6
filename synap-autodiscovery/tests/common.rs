//! Common test utilities

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use synap_autodiscovery::{
    ClusterClientConfig, ClusterError, ClusterResult, FailureNotifier, Node, NodeFactory,
    Operation, OperationData, OperationResult, Resolver, SocketPoolConfig,
};

/// Scripted cluster shared by every mock node
///
/// Config payloads are served in the order they were pushed; once the queue
/// is drained the last one keeps being served.
pub struct MockCluster {
    engine_version: Option<String>,
    payloads: Mutex<VecDeque<String>>,
    current: Mutex<Option<String>>,
    down: AtomicBool,
    config_ops: Mutex<Vec<Operation>>,
}

#[allow(dead_code)] // Used by other test modules
impl MockCluster {
    pub fn new(engine_version: &str) -> Arc<Self> {
        Self::build(Some(engine_version.to_string()))
    }

    /// Cluster whose `stats` carries no version
    pub fn without_version() -> Arc<Self> {
        Self::build(None)
    }

    fn build(engine_version: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            engine_version,
            payloads: Mutex::new(VecDeque::new()),
            current: Mutex::new(None),
            down: AtomicBool::new(false),
            config_ops: Mutex::new(Vec::new()),
        })
    }

    pub fn push_payload(&self, payload: String) {
        self.payloads.lock().push_back(payload);
    }

    /// Make every config fetch fail at the transport level
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Config operations received so far, across all nodes
    pub fn config_ops(&self) -> Vec<Operation> {
        self.config_ops.lock().clone()
    }

    pub fn config_calls(&self) -> usize {
        self.config_ops.lock().len()
    }

    fn next_config(&self) -> Option<String> {
        let mut current = self.current.lock();
        if let Some(next) = self.payloads.lock().pop_front() {
            *current = Some(next);
        }
        current.clone()
    }
}

pub struct MockNode {
    endpoint: SocketAddr,
    cluster: Arc<MockCluster>,
    alive: AtomicBool,
    answers_ping: AtomicBool,
    disposed: AtomicUsize,
    notifier: Mutex<Option<FailureNotifier>>,
}

#[allow(dead_code)] // Used by other test modules
impl MockNode {
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Mark the node dead and raise its failure signal
    pub fn fail(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            if let Some(notifier) = self.notifier.lock().as_ref() {
                notifier.notify(self.endpoint);
            }
        }
    }

    pub fn set_answers_ping(&self, answers: bool) {
        self.answers_ping.store(answers, Ordering::SeqCst);
    }

    pub fn dispose_count(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Node for MockNode {
    fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    async fn execute(&self, op: &Operation) -> ClusterResult<OperationResult> {
        match op {
            Operation::Stats => {
                let mut stats = HashMap::new();
                stats.insert("pid".to_string(), "1".to_string());
                if let Some(version) = &self.cluster.engine_version {
                    stats.insert("version".to_string(), version.clone());
                }
                Ok(OperationResult::pass(OperationData::Stats(stats)))
            }
            Operation::Gets { .. } | Operation::ConfigGet { .. } => {
                self.cluster.config_ops.lock().push(op.clone());

                if self.cluster.down.load(Ordering::SeqCst) {
                    return Err(ClusterError::Transport {
                        endpoint: self.endpoint,
                        message: "connection refused".to_string(),
                    });
                }

                match self.cluster.next_config() {
                    Some(payload) => Ok(OperationResult::pass(OperationData::Value {
                        flags: 0,
                        cas: 1,
                        data: Bytes::from(payload),
                    })),
                    None => Ok(OperationResult::fail("Failed to read response")),
                }
            }
            Operation::Version => Ok(OperationResult::pass(OperationData::Version(
                "1.6.22".to_string(),
            ))),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> bool {
        let answers = self.answers_ping.load(Ordering::SeqCst);
        if answers {
            self.alive.store(true, Ordering::SeqCst);
        }
        answers
    }

    fn subscribe_failures(&self, notifier: FailureNotifier) {
        *self.notifier.lock() = Some(notifier);
    }

    fn dispose(&self) -> ClusterResult<()> {
        if self.disposed.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(ClusterError::Disposed);
        }
        Ok(())
    }
}

/// Factory recording every node it creates
pub struct MockFactory {
    cluster: Arc<MockCluster>,
    created: Mutex<Vec<Arc<MockNode>>>,
}

#[allow(dead_code)] // Used by other test modules
impl MockFactory {
    pub fn new(cluster: Arc<MockCluster>) -> Arc<Self> {
        Arc::new(Self {
            cluster,
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn created(&self) -> Vec<Arc<MockNode>> {
        self.created.lock().clone()
    }

    /// Most recently created node for `endpoint`
    pub fn node(&self, endpoint: SocketAddr) -> Arc<MockNode> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|n| n.endpoint == endpoint)
            .cloned()
            .expect("no node created for endpoint")
    }
}

impl NodeFactory for MockFactory {
    fn create_node(&self, endpoint: SocketAddr, _config: &SocketPoolConfig) -> Arc<dyn Node> {
        let node = Arc::new(MockNode {
            endpoint,
            cluster: Arc::clone(&self.cluster),
            alive: AtomicBool::new(true),
            answers_ping: AtomicBool::new(true),
            disposed: AtomicUsize::new(0),
            notifier: Mutex::new(None),
        });
        self.created.lock().push(Arc::clone(&node));
        node
    }
}

/// Resolver returning fixed addresses, optionally failing first
pub struct StaticResolver {
    addrs: Vec<SocketAddr>,
    failures_left: AtomicU32,
    calls: AtomicU32,
}

#[allow(dead_code)] // Used by other test modules
impl StaticResolver {
    pub fn new(addr: SocketAddr) -> Arc<Self> {
        Self::failing(addr, 0)
    }

    /// Fail the first `failures` lookups
    pub fn failing(addr: SocketAddr, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            addrs: vec![addr],
            failures_left: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, hostname: &str, _port: u16) -> io::Result<Vec<SocketAddr>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such host: {}", hostname),
            ));
        }
        Ok(self.addrs.clone())
    }
}

/// Address the configuration endpoint resolves to
#[allow(dead_code)] // Used by other test modules
pub fn config_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 11211))
}

#[allow(dead_code)] // Used by other test modules
pub fn addr(i: u8) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, i], 11211))
}

/// Cluster config payload listing `nodes` (last octets of 10.0.0.x)
#[allow(dead_code)] // Used by other test modules
pub fn payload(version: u64, nodes: &[u8]) -> String {
    let list: Vec<String> = nodes
        .iter()
        .map(|i| format!("node-{}.cache.local|10.0.0.{}|11211", i, i))
        .collect();
    format!("{}\n{}\n", version, list.join(" "))
}

/// Fast retries and a poll interval long enough to stay out of the way
#[allow(dead_code)] // Used by other test modules
pub fn test_config() -> ClusterClientConfig {
    ClusterClientConfig::new("mycluster.cfg.local", 11211)
        .with_tries(2)
        .with_delay(Duration::from_millis(10))
        .with_poll_interval(Duration::from_secs(3600))
        .with_dead_timeout(Duration::from_secs(1))
}

/// Install a test subscriber once per binary (set RUST_LOG to see output)
#[allow(dead_code)] // Used by other test modules
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
