use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::TopologyError;
use crate::topology::tree::{ClusterTopology, NodeId};

/// Read-only view of a cluster used by the console and node runtime: the
/// shared topology model plus address resolution. Test clusters swap the
/// resolution while keeping every derivation rule intact.
pub trait ClusterView: Send + Sync {
    fn topology(&self) -> &ClusterTopology;

    fn node_address(&self, node: &NodeId) -> Result<String, TopologyError>;

    /// Resolve a group or node name to `(node, address)` pairs in the
    /// group's canonical order.
    fn resolve_target(&self, target: &str) -> Result<Vec<(NodeId, String)>, TopologyError> {
        self.topology()
            .group_node_ids(target)?
            .into_iter()
            .map(|node| self.node_address(&node).map(|addr| (node, addr)))
            .collect()
    }
}

impl ClusterView for ClusterTopology {
    fn topology(&self) -> &ClusterTopology {
        self
    }

    fn node_address(&self, node: &NodeId) -> Result<String, TopologyError> {
        self.default_address(node)
    }
}

/// Decorator over the real topology model that intercepts address resolution
/// only: every node lives on 127.0.0.1 with a distinct port. Ports default to
/// `base_port + global position`; an in-process cluster records the actually
/// bound addresses instead.
pub struct VirtualTopology {
    inner: Arc<ClusterTopology>,
    base_port: u16,
    bound: RwLock<HashMap<NodeId, String>>,
}

impl VirtualTopology {
    pub fn new(inner: Arc<ClusterTopology>, base_port: u16) -> Self {
        VirtualTopology { inner, base_port, bound: RwLock::new(HashMap::new()) }
    }

    /// Record the address a node server actually bound; overrides the
    /// deterministic port for that node.
    pub fn record_bound(&self, node: NodeId, address: String) {
        self.bound.write().expect("address map poisoned").insert(node, address);
    }
}

impl ClusterView for VirtualTopology {
    fn topology(&self) -> &ClusterTopology {
        &self.inner
    }

    fn node_address(&self, node: &NodeId) -> Result<String, TopologyError> {
        if let Some(addr) = self.bound.read().expect("address map poisoned").get(node) {
            return Ok(addr.clone());
        }
        let position = self
            .inner
            .global_position(node.machine(), node.index())
            .ok_or_else(|| TopologyError::UnknownNode(node.to_string()))?;
        Ok(format!("127.0.0.1:{}", self.base_port as usize + position))
    }
}
