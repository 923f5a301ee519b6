//! Configuration Poller
//!
//! Periodically asks the discovery node for the cluster config and pushes
//! topology changes into the server pool. A tick never fails: errors are
//! logged, recovery is tried once and the pool degrades to an empty routing
//! set if that fails too.

use crate::discovery::DiscoveryNode;
use crate::error::ClusterResult;
use crate::pool::AutoServerPool;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, warn};

struct PollerInner {
    discovery: Arc<DiscoveryNode>,
    pool: AutoServerPool,
    interval: Duration,
}

/// Background refresh of the cluster topology
pub struct ConfigurationPoller {
    inner: Arc<PollerInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConfigurationPoller {
    pub fn new(discovery: Arc<DiscoveryNode>, pool: AutoServerPool, interval: Duration) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                discovery,
                pool,
                interval,
            }),
            task: Mutex::new(None),
        }
    }

    /// Run one tick now, then keep polling every `interval`
    ///
    /// Does nothing if the poller is already running.
    pub async fn start(&self) {
        if self.is_running() {
            return;
        }

        debug!("Starting configuration poller (interval {:?})", self.inner.interval);
        self.inner.poll().await;

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let start = Instant::now() + inner.interval;
            let mut ticker = interval_at(start, inner.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                inner.poll().await;
            }
        });

        let previous = self.task.lock().replace(handle);
        if let Some(previous) = previous {
            // Lost a race with a concurrent start
            previous.abort();
        }
    }

    /// Run a single tick on the caller's task
    pub async fn poll_once(&self) {
        self.inner.poll().await;
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Stop polling. Idempotent.
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            debug!("Stopping configuration poller");
            handle.abort();
        }
    }
}

impl Drop for ConfigurationPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

impl PollerInner {
    async fn poll(&self) {
        debug!("Polling cluster configuration");

        let Err(e) = self.refresh().await else {
            return;
        };
        error!(
            "Error updating endpoints, re-resolving the configuration endpoint: {}",
            e
        );

        let recovery = async {
            self.discovery.resolve_endpoint().await?;
            self.refresh().await
        };

        if let Err(e) = recovery.await {
            error!(
                "Could not recover the configuration endpoint, routing to no nodes: {}",
                e
            );
            if let Err(e) = self.pool.update_locator(Vec::new()) {
                warn!("Could not clear the server pool: {}", e);
            }
        }
    }

    /// Fetch the endpoint list and update the pool if the topology moved
    async fn refresh(&self) -> ClusterResult<()> {
        let old_version = self.discovery.cluster_version();
        let endpoints = self.discovery.get_endpoint_list().await?;
        let new_version = self.discovery.cluster_version();
        let working = self.pool.working_nodes().len();

        if old_version != new_version || endpoints.len() != working {
            debug!(
                "Updating endpoints to {} nodes (version {} -> {}, {} working)",
                endpoints.len(),
                old_version,
                new_version,
                working
            );
            self.pool.update_locator(endpoints)?;
        }

        Ok(())
    }
}
