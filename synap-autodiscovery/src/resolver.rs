//! Hostname resolution for the discovery endpoint

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;

/// Resolves a hostname to socket addresses
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, hostname: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

/// System DNS resolver (tokio `lookup_host`)
#[derive(Debug, Default, Clone)]
pub struct DnsResolver;

#[async_trait]
impl Resolver for DnsResolver {
    async fn resolve(&self, hostname: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        let addrs = tokio::net::lookup_host((hostname, port)).await?;
        Ok(addrs.collect())
    }
}
