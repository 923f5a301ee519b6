use crate::error::{ClusterError, ClusterResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Marker that distinguishes a discovery hostname from a plain node address
pub const DISCOVERY_MARKER: &str = ".cfg";

/// First engine version that understands `config get`
pub const CONFIG_GET_MIN_VERSION: EngineVersion = EngineVersion::new(1, 4, 14);

/// Discovery endpoint of a cluster (hostname must carry the `.cfg` marker)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterEndpoint {
    hostname: String,
    port: u16,
}

impl ClusterEndpoint {
    /// Create a discovery endpoint, rejecting hostnames without the marker
    pub fn new(hostname: impl Into<String>, port: u16) -> ClusterResult<Self> {
        let hostname = hostname.into();

        if hostname.is_empty() {
            return Err(ClusterError::InvalidEndpoint(
                "hostname is empty".to_string(),
            ));
        }
        if port == 0 {
            return Err(ClusterError::InvalidEndpoint(
                "port cannot be zero".to_string(),
            ));
        }
        if !has_discovery_marker(&hostname) {
            return Err(ClusterError::InvalidEndpoint(format!(
                "{} does not support auto discovery",
                hostname
            )));
        }

        Ok(Self { hostname, port })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ClusterEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

fn has_discovery_marker(hostname: &str) -> bool {
    hostname
        .to_ascii_lowercase()
        .contains(DISCOVERY_MARKER)
}

/// Lifecycle phase of the discovery node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryPhase {
    /// Resolving the discovery hostname (also the fallback after probe failure)
    Resolving,
    /// Probe node bound, fetching cluster config
    Probing,
    /// Last config fetch succeeded
    Ready,
}

/// Cache engine version as reported by `stats`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl EngineVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a dotted version such as `1.6.22` (missing parts default to 0)
    pub fn parse(raw: &str) -> ClusterResult<Self> {
        // Engines may append build info, e.g. "1.4.14 (Ubuntu)" or "1.6.9-rc1"
        let head = raw
            .trim()
            .split(|c: char| !(c.is_ascii_digit() || c == '.'))
            .next()
            .unwrap_or_default();

        let mut parts = head.split('.').filter(|p| !p.is_empty());
        let major = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| ClusterError::Protocol(format!("invalid engine version: {}", raw)))?;
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);

        Ok(Self::new(major, minor, patch))
    }

    /// Whether the engine supports the dedicated `config get` command
    pub fn supports_config_get(&self) -> bool {
        *self >= CONFIG_GET_MIN_VERSION
    }
}

impl Ord for EngineVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl PartialOrd for EngineVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Cluster configuration as returned by a discovery probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfigPayload {
    /// Topology version reported by the cluster
    pub version: u64,
    /// Raw `hostname|ip|port` list
    pub endpoints: String,
}

impl ClusterConfigPayload {
    /// Parse `<version>\n<endpoint-list>\n`
    pub fn parse(raw: &str) -> ClusterResult<Self> {
        let mut lines = raw.split('\n');

        let version_line = lines.next().unwrap_or_default().trim();
        let version = version_line.parse::<u64>().map_err(|_| {
            ClusterError::Protocol(format!("invalid cluster version: {:?}", version_line))
        })?;

        let endpoints = lines
            .next()
            .ok_or_else(|| ClusterError::Protocol("missing endpoint list".to_string()))?
            .trim()
            .to_string();

        Ok(Self { version, endpoints })
    }
}

/// Parse a space-separated `hostname|ip|port` list into socket addresses
///
/// Only the ip and port fields are used. Tokens with an invalid IP literal,
/// an invalid port or too few fields are dropped.
pub fn parse_endpoint_list(list: &str) -> Vec<SocketAddr> {
    let mut endpoints = Vec::new();

    for token in list.split_whitespace() {
        let mut parts = token.split('|');
        let (Some(_host), Some(ip), Some(port)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };

        let (Ok(ip), Ok(port)) = (ip.parse::<IpAddr>(), port.parse::<u16>()) else {
            continue;
        };

        let endpoint = SocketAddr::new(ip, port);
        if !endpoints.contains(&endpoint) {
            endpoints.push(endpoint);
        }
    }

    endpoints
}
