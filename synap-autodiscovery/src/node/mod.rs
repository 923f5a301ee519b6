//! Node capability
//!
//! A node is a live connection to one cache server. The discovery core only
//! needs a handful of operations from it; everything else about the wire
//! protocol stays behind this trait.

pub mod tcp;

use crate::config::SocketPoolConfig;
use crate::error::ClusterResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;

pub use tcp::{TcpNode, TcpNodeFactory};

/// Key used by engines older than 1.4.14
pub const LEGACY_CONFIG_KEY: &str = "AmazonElastiCache:cluster";

/// Key used with `config get`
pub const CONFIG_KEY: &str = "cluster";

/// Operations the discovery core sends to nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// `stats` - engine statistics, including `version`
    Stats,
    /// `gets <key>` - legacy config fetch
    Gets { key: String },
    /// `config get <key>` - dedicated config fetch
    ConfigGet { key: String },
    /// `version` - liveness probe
    Version,
}

impl Operation {
    pub fn legacy_config() -> Self {
        Self::Gets {
            key: LEGACY_CONFIG_KEY.to_string(),
        }
    }

    pub fn config() -> Self {
        Self::ConfigGet {
            key: CONFIG_KEY.to_string(),
        }
    }
}

/// Data carried by a successful operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OperationData {
    #[default]
    None,
    Value { flags: u32, cas: u64, data: Bytes },
    Stats(HashMap<String, String>),
    Version(String),
}

/// Outcome of [`Node::execute`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
    pub data: OperationData,
}

impl OperationResult {
    pub fn pass(data: OperationData) -> Self {
        Self {
            success: true,
            message: String::new(),
            data,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: OperationData::None,
        }
    }

    /// Value payload, if the operation returned one
    pub fn value(&self) -> Option<&Bytes> {
        match &self.data {
            OperationData::Value { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Stats map, if the operation returned one
    pub fn stats(&self) -> Option<&HashMap<String, String>> {
        match &self.data {
            OperationData::Stats(stats) => Some(stats),
            _ => None,
        }
    }
}

/// Sending half of a pool's failure channel, handed to each node at registration
#[derive(Debug, Clone)]
pub struct FailureNotifier {
    tx: mpsc::UnboundedSender<SocketAddr>,
}

impl FailureNotifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SocketAddr>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report that the node at `endpoint` failed
    pub fn notify(&self, endpoint: SocketAddr) {
        // Receiver gone means the pool was torn down
        let _ = self.tx.send(endpoint);
    }
}

/// A connection to one cache server
#[async_trait]
pub trait Node: Send + Sync {
    /// Network identity of the node
    fn endpoint(&self) -> SocketAddr;

    /// Run an operation. `Err` means the transport failed; server-side
    /// errors come back as an unsuccessful [`OperationResult`].
    async fn execute(&self, op: &Operation) -> ClusterResult<OperationResult>;

    fn is_alive(&self) -> bool;

    /// Try to reach a dead node. `true` means it is alive again and
    /// [`is_alive`](Node::is_alive) reports so until the next failure.
    async fn ping(&self) -> bool;

    /// Register the channel that receives this node's failure signal
    fn subscribe_failures(&self, notifier: FailureNotifier);

    fn last_failure(&self) -> Option<SystemTime> {
        None
    }

    /// Release network resources. Called exactly once by the owner.
    fn dispose(&self) -> ClusterResult<()>;
}

/// Creates nodes for endpoints
pub trait NodeFactory: Send + Sync {
    fn create_node(&self, endpoint: SocketAddr, config: &SocketPoolConfig) -> Arc<dyn Node>;
}

/// Dispose a node, logging instead of propagating failures
pub(crate) fn dispose_quietly(node: &Arc<dyn Node>) {
    if let Err(e) = node.dispose() {
        tracing::error!("Error disposing node {}: {}", node.endpoint(), e);
    }
}
