use crate::internal::common::{Map, Set};
use crate::internal::resources::descriptor::ResourceDescriptor;
use serde::{Deserialize, Serialize};

/// One cluster node as last reported by the cluster inventory.
/// `available` is the cluster's own view; in-flight requests tracked by
/// [`NodeInventory`] are subtracted on top of it during filtering.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Node {
    pub host: String,
    pub labels: Set<String>,
    pub gpu_type: Option<String>,
    pub total: ResourceDescriptor,
    pub available: ResourceDescriptor,
}

impl Node {
    pub fn new(host: &str, total: ResourceDescriptor) -> Self {
        Node {
            host: host.to_string(),
            labels: Set::default(),
            gpu_type: None,
            available: total.clone(),
            total,
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.labels.insert(label.to_string());
        self
    }

    pub fn with_gpu_type(mut self, gpu_type: &str) -> Self {
        self.gpu_type = Some(gpu_type.to_string());
        self
    }
}

/// Per-node resource bookkeeping: the live node set, the outstanding
/// ledger (requested but not yet fulfilled or released) and the
/// locally-tried ledger (requested then released; disfavored while the
/// policy asks to skip recently thrashed amounts).
///
/// Ledgers are mutated only through the request/release calls below,
/// never by filtering reads.
#[derive(Debug, Default)]
pub struct NodeInventory {
    nodes: Map<String, Node>,
    outstanding: Map<String, ResourceDescriptor>,
    locally_tried: Map<String, ResourceDescriptor>,
}

impl NodeInventory {
    /// Inserts or refreshes a node from an authoritative cluster
    /// report. An existing entry is merged (reported fields replaced)
    /// rather than recreated, so ledger state tied to the host
    /// survives; the locally-tried entry is dropped because the report
    /// supersedes it.
    pub fn update_node(&mut self, node: Node) {
        self.locally_tried.remove(&node.host);
        match self.nodes.get_mut(&node.host) {
            Some(existing) => {
                existing.labels = node.labels;
                existing.gpu_type = node.gpu_type;
                existing.total = node.total;
                existing.available = node.available;
            }
            None => {
                log::debug!("Node {} joined the inventory", node.host);
                self.nodes.insert(node.host.clone(), node);
            }
        }
    }

    /// Registers a freshly reported node; same merge semantics as
    /// [`Self::update_node`] if the host is already known.
    pub fn add_node(&mut self, node: Node) {
        self.update_node(node);
    }

    pub fn remove_node(&mut self, host: &str) {
        log::debug!("Node {host} removed from the inventory");
        self.nodes.remove(host);
        self.outstanding.remove(host);
        self.locally_tried.remove(host);
    }

    pub fn get(&self, host: &str) -> Option<&Node> {
        self.nodes.get(host)
    }

    pub fn hosts(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The node's reported availability minus its outstanding ledger,
    /// and minus the locally-tried ledger when `skip_local_tried` is
    /// set. Returns `None` for an unknown host.
    pub fn effective_available(
        &self,
        host: &str,
        skip_local_tried: bool,
    ) -> Option<ResourceDescriptor> {
        let node = self.nodes.get(host)?;
        let mut available = node.available.clone();
        if let Some(outstanding) = self.outstanding.get(host) {
            available = available.subtract(outstanding);
        }
        if skip_local_tried {
            if let Some(tried) = self.locally_tried.get(host) {
                available = available.subtract(tried);
            }
        }
        Some(available)
    }

    /// Books `resource` as outstanding on every listed host, shrinking
    /// their effective availability for the rest of the scheduling
    /// pass.
    pub fn add_container_request(&mut self, resource: &ResourceDescriptor, hosts: &[String]) {
        for host in hosts {
            log::debug!("Outstanding +{resource} on {host}");
            match self.outstanding.get_mut(host) {
                Some(ledger) => *ledger = ledger.add(resource),
                None => {
                    self.outstanding.insert(host.clone(), resource.clone());
                }
            }
        }
    }

    /// Releases `resource` from the outstanding ledger of every listed
    /// host (fulfilled or abandoned) and accumulates it into the
    /// locally-tried ledger, biasing near-future selections away from
    /// re-offering an amount that just failed to materialize.
    pub fn remove_container_request(&mut self, resource: &ResourceDescriptor, hosts: &[String]) {
        for host in hosts {
            log::debug!("Outstanding -{resource} on {host}");
            if let Some(ledger) = self.outstanding.get_mut(host) {
                *ledger = ledger.subtract(resource);
            }
            match self.locally_tried.get_mut(host) {
                Some(tried) => *tried = tried.add(resource),
                None => {
                    self.locally_tried.insert(host.clone(), resource.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_merges_and_preserves_ledger() {
        let mut inventory = NodeInventory::default();
        inventory.update_node(Node::new("n1", ResourceDescriptor::simple(8, 8192)));

        let request = ResourceDescriptor::simple(2, 1024);
        inventory.add_container_request(&request, &["n1".to_string()]);

        // Refresh with a new report; the outstanding ledger must survive
        inventory.update_node(Node::new("n1", ResourceDescriptor::simple(8, 8192)).with_label("x"));
        let avail = inventory.effective_available("n1", false).unwrap();
        assert_eq!(avail.cpu_number, 6);
        assert_eq!(avail.memory_mb, 7168);
        assert!(inventory.get("n1").unwrap().labels.contains("x"));
    }

    #[test]
    fn test_remove_request_feeds_locally_tried() {
        let mut inventory = NodeInventory::default();
        inventory.update_node(Node::new("n1", ResourceDescriptor::simple(8, 8192)));
        let hosts = vec!["n1".to_string()];
        let request = ResourceDescriptor::simple(2, 1024);

        inventory.add_container_request(&request, &hosts);
        inventory.remove_container_request(&request, &hosts);

        // Outstanding is back to zero...
        let avail = inventory.effective_available("n1", false).unwrap();
        assert_eq!(avail.cpu_number, 8);
        // ...but the tried ledger still shadows the amount
        let avail = inventory.effective_available("n1", true).unwrap();
        assert_eq!(avail.cpu_number, 6);

        // An authoritative refresh clears the tried ledger
        inventory.update_node(Node::new("n1", ResourceDescriptor::simple(8, 8192)));
        let avail = inventory.effective_available("n1", true).unwrap();
        assert_eq!(avail.cpu_number, 8);
    }

    #[test]
    fn test_remove_node_clears_everything() {
        let mut inventory = NodeInventory::default();
        inventory.update_node(Node::new("n1", ResourceDescriptor::simple(4, 4096)));
        inventory.add_container_request(
            &ResourceDescriptor::simple(1, 512),
            &["n1".to_string()],
        );
        inventory.remove_node("n1");
        assert!(inventory.is_empty());
        assert!(inventory.effective_available("n1", true).is_none());
    }
}
