//! Routing objects (key → node)
//!
//! A locator is built once per routing generation: `initialize` is called on
//! a fresh instance before it is published and never again afterwards.

pub mod hash_slot;

use crate::node::Node;
use std::sync::Arc;

pub use hash_slot::{HashSlotLocator, HashSlotLocatorFactory, hash_slot};

/// Pluggable key → node mapping
pub trait NodeLocator: Send + Sync {
    /// Build the mapping for the given alive nodes
    fn initialize(&mut self, nodes: Vec<Arc<dyn Node>>);

    fn locate(&self, key: &str) -> Option<Arc<dyn Node>>;

    /// Nodes this locator routes to
    fn working_nodes(&self) -> Vec<Arc<dyn Node>>;

    /// Called once when the owning pool shuts down
    fn dispose(&self) {}
}

/// Creates a fresh locator for every routing generation
pub trait LocatorFactory: Send + Sync {
    fn create(&self) -> Box<dyn NodeLocator>;
}
