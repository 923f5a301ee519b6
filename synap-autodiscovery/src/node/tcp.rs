//! Text-protocol node over a single TCP connection

use super::{FailureNotifier, Node, NodeFactory, Operation, OperationData, OperationResult};
use crate::config::SocketPoolConfig;
use crate::error::{ClusterError, ClusterResult};
use crate::protocol::{self, ProtocolError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use tokio::io::{AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Node speaking the memcached text protocol
pub struct TcpNode {
    endpoint: SocketAddr,
    config: SocketPoolConfig,
    conn: tokio::sync::Mutex<Option<BufStream<TcpStream>>>,
    alive: AtomicBool,
    disposed: AtomicBool,
    last_failure: Mutex<Option<SystemTime>>,
    notifier: Mutex<Option<FailureNotifier>>,
}

impl TcpNode {
    pub fn new(endpoint: SocketAddr, config: SocketPoolConfig) -> Self {
        Self {
            endpoint,
            config,
            conn: tokio::sync::Mutex::new(None),
            alive: AtomicBool::new(true),
            disposed: AtomicBool::new(false),
            last_failure: Mutex::new(None),
            notifier: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<BufStream<TcpStream>, ProtocolError> {
        let stream = timeout(self.config.connect_timeout(), TcpStream::connect(self.endpoint))
            .await
            .map_err(|_| {
                ProtocolError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connect timed out",
                ))
            })??;
        stream.set_nodelay(true)?;
        Ok(BufStream::new(stream))
    }

    async fn round_trip(
        &self,
        stream: &mut BufStream<TcpStream>,
        op: &Operation,
    ) -> Result<OperationResult, ProtocolError> {
        stream.write_all(&protocol::encode(op)).await?;
        stream.flush().await?;

        timeout(
            self.config.receive_timeout(),
            protocol::read_response(op, stream),
        )
        .await
        .map_err(|_| {
            ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "receive timed out",
            ))
        })?
    }

    async fn execute_inner(&self, op: &Operation) -> Result<OperationResult, ProtocolError> {
        let mut guard = self.conn.lock().await;

        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }

        let Some(stream) = guard.as_mut() else {
            return Err(ProtocolError::Closed);
        };

        match self.round_trip(stream, op).await {
            Ok(result) => Ok(result),
            Err(e) => {
                // Stream state is unknown after a failed round trip
                *guard = None;
                Err(e)
            }
        }
    }

    fn mark_failed(&self) {
        *self.last_failure.lock() = Some(SystemTime::now());

        // Only the alive → dead transition raises the signal
        if self.alive.swap(false, Ordering::SeqCst) {
            warn!("Node {} marked as dead", self.endpoint);
            if let Some(notifier) = self.notifier.lock().as_ref() {
                notifier.notify(self.endpoint);
            }
        }
    }
}

#[async_trait]
impl Node for TcpNode {
    fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    async fn execute(&self, op: &Operation) -> ClusterResult<OperationResult> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(ClusterError::Disposed);
        }

        match self.execute_inner(op).await {
            Ok(result) => Ok(result),
            Err(e) => {
                debug!("Operation {:?} on {} failed: {}", op, self.endpoint, e);
                self.mark_failed();
                Err(ClusterError::transport(self.endpoint, e))
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> bool {
        if self.disposed.load(Ordering::SeqCst) {
            return false;
        }

        match self.execute_inner(&Operation::Version).await {
            Ok(OperationResult {
                data: OperationData::Version(version),
                ..
            }) => {
                debug!("Node {} answered ping (version {})", self.endpoint, version);
                self.alive.store(true, Ordering::SeqCst);
                true
            }
            Ok(_) => false,
            Err(e) => {
                debug!("Ping to {} failed: {}", self.endpoint, e);
                *self.last_failure.lock() = Some(SystemTime::now());
                false
            }
        }
    }

    fn subscribe_failures(&self, notifier: FailureNotifier) {
        *self.notifier.lock() = Some(notifier);
    }

    fn last_failure(&self) -> Option<SystemTime> {
        *self.last_failure.lock()
    }

    fn dispose(&self) -> ClusterResult<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Err(ClusterError::Disposed);
        }

        self.notifier.lock().take();

        // A concurrent operation still holds the stream; it is dropped with the node
        if let Ok(mut guard) = self.conn.try_lock() {
            guard.take();
        }

        debug!("Disposed node {}", self.endpoint);
        Ok(())
    }
}

/// Default node factory producing [`TcpNode`]s
#[derive(Debug, Default, Clone)]
pub struct TcpNodeFactory;

impl NodeFactory for TcpNodeFactory {
    fn create_node(&self, endpoint: SocketAddr, config: &SocketPoolConfig) -> Arc<dyn Node> {
        Arc::new(TcpNode::new(endpoint, config.clone()))
    }
}
