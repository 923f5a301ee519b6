use crate::error::{ClusterError, ClusterResult};
use crate::types::ClusterEndpoint;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default number of resolution / config fetch attempts
pub const DEFAULT_TRIES: u32 = 5;

/// Default delay between attempts (milliseconds)
pub const DEFAULT_DELAY_MS: u64 = 1000;

/// Default delay between polls (milliseconds)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 60_000;

/// Auto-discovery client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterClientConfig {
    /// Cluster configuration endpoint
    pub endpoint: EndpointConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub poller: PollerConfig,

    #[serde(default)]
    pub socket_pool: SocketPoolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Hostname of the cluster, containing ".cfg"
    pub hostname: String,
    pub port: u16,
}

/// Retry budget for the discovery node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// How many times to try resolving / fetching the config
    pub tries: u32,
    /// Delay between tries (milliseconds)
    pub delay_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            tries: DEFAULT_TRIES,
            delay_ms: DEFAULT_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Delay between polls (milliseconds)
    pub interval_ms: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

/// Transport settings handed to every node the factory creates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketPoolConfig {
    pub connect_timeout_ms: u64,
    pub receive_timeout_ms: u64,
    /// How long a dead node stays out of rotation before it is pinged again
    pub dead_timeout_ms: u64,
}

impl Default for SocketPoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            receive_timeout_ms: 10_000,
            dead_timeout_ms: 10_000,
        }
    }
}

impl SocketPoolConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn dead_timeout(&self) -> Duration {
        Duration::from_millis(self.dead_timeout_ms)
    }
}

impl ClusterClientConfig {
    /// Create a config with default settings for the given endpoint
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            endpoint: EndpointConfig {
                hostname: hostname.into(),
                port,
            },
            discovery: DiscoveryConfig::default(),
            poller: PollerConfig::default(),
            socket_pool: SocketPoolConfig::default(),
        }
    }

    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ClusterClientConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings and build the discovery endpoint
    pub fn validate(&self) -> ClusterResult<ClusterEndpoint> {
        if self.discovery.tries == 0 {
            return Err(ClusterError::Config("must try at least once".to_string()));
        }
        if self.poller.interval_ms == 0 {
            return Err(ClusterError::Config(
                "poll interval cannot be zero".to_string(),
            ));
        }

        ClusterEndpoint::new(self.endpoint.hostname.clone(), self.endpoint.port)
    }

    pub fn with_tries(mut self, tries: u32) -> Self {
        self.discovery.tries = tries;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.discovery.delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poller.interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_dead_timeout(mut self, timeout: Duration) -> Self {
        self.socket_pool.dead_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Get delay between discovery tries as Duration
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.discovery.delay_ms)
    }

    /// Get poll interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poller.interval_ms)
    }
}
