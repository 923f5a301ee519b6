use std::net::SocketAddr;
use thiserror::Error;

/// Auto-discovery error types
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Could not resolve {hostname} after {tries} tries: {message}")]
    Resolution {
        hostname: String,
        tries: u32,
        message: String,
    },

    #[error("Could not get cluster config (engine {engine_version}). Tries: {tries} Delay: {delay_ms}ms. {message}")]
    DiscoveryTimeout {
        engine_version: String,
        tries: u32,
        delay_ms: u64,
        message: String,
    },

    #[error("Unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("Transport error on {endpoint}: {message}")]
    Transport { endpoint: SocketAddr, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No reachable node")]
    NoReachableNode,

    #[error("Component already disposed")]
    Disposed,
}

impl ClusterError {
    pub(crate) fn transport(endpoint: SocketAddr, err: impl std::fmt::Display) -> Self {
        Self::Transport {
            endpoint,
            message: err.to_string(),
        }
    }
}

/// Result type alias for auto-discovery operations
pub type ClusterResult<T> = Result<T, ClusterError>;
