//! Gossip topology for the local node
//!
//! Holds the cluster membership announced at bootstrap and the neighbor set
//! this node fans values out to. The neighbor set defaults to every other
//! member and can be replaced by an externally supplied adjacency.

use std::collections::HashSet;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::message::{Adjacency, NodeId};

/// How supplied topologies are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TopologyMode {
    /// Use the local entry of each `topology` request
    #[default]
    Provided,
    /// Ignore `topology` requests and gossip to every other member
    FullMesh,
}

impl std::str::FromStr for TopologyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provided" => Ok(Self::Provided),
            "full-mesh" | "full_mesh" => Ok(Self::FullMesh),
            other => Err(format!("unknown topology mode {:?}", other)),
        }
    }
}

/// Neighbor set currently in force
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkTopology {
    /// Fan-out targets, never containing the local node
    pub neighbors: Vec<NodeId>,
    /// Whether the set came from a supplied adjacency
    pub explicit: bool,
    /// Bumped on every successful `configure`
    pub version: u64,
}

/// Owner of the local node's fan-out target set
#[derive(Debug)]
pub struct TopologyManager {
    node_id: NodeId,
    members: Vec<NodeId>,
    mode: TopologyMode,
    current: RwLock<NetworkTopology>,
}

impl TopologyManager {
    /// Create a manager that gossips to every other member until configured
    pub fn new(node_id: impl Into<NodeId>, members: Vec<NodeId>, mode: TopologyMode) -> Self {
        let node_id = node_id.into();
        let neighbors = Self::default_neighbors(&node_id, &members);

        Self {
            node_id,
            members,
            mode,
            current: RwLock::new(NetworkTopology {
                neighbors,
                explicit: false,
                version: 0,
            }),
        }
    }

    /// Install the neighbor list for this node from a cluster-wide adjacency.
    ///
    /// Missing local entry falls back to every other member. Unknown peer ids
    /// are dropped; if that empties a non-empty entry, the fallback applies.
    /// An explicitly empty entry isolates the node.
    pub async fn configure(&self, adjacency: &Adjacency) -> NetworkTopology {
        if self.mode == TopologyMode::FullMesh {
            debug!(node_id = %self.node_id, "Ignoring supplied topology in full-mesh mode");
            return self.current().await;
        }

        let (neighbors, explicit) = match adjacency.get(&self.node_id) {
            Some(entry) => {
                let known = self.known_neighbors(entry);
                if known.is_empty() && !entry.is_empty() {
                    warn!(
                        node_id = %self.node_id,
                        supplied = ?entry,
                        "Topology entry names no known members, using all members"
                    );
                    (Self::default_neighbors(&self.node_id, &self.members), false)
                } else {
                    (known, true)
                }
            }
            None => {
                warn!(
                    node_id = %self.node_id,
                    "Topology has no entry for this node, using all members"
                );
                (Self::default_neighbors(&self.node_id, &self.members), false)
            }
        };

        let mut current = self.current.write().await;
        current.neighbors = neighbors;
        current.explicit = explicit;
        current.version += 1;

        info!(
            node_id = %self.node_id,
            neighbors = ?current.neighbors,
            version = current.version,
            "Installed gossip topology"
        );

        current.clone()
    }

    /// Current fan-out targets, excluding self
    pub async fn neighbors(&self) -> Vec<NodeId> {
        self.current.read().await.neighbors.clone()
    }

    /// Full view of the installed topology
    pub async fn current(&self) -> NetworkTopology {
        self.current.read().await.clone()
    }

    /// Identifier of the local node
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Cluster members as announced at bootstrap
    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    fn default_neighbors(node_id: &str, members: &[NodeId]) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        members
            .iter()
            .filter(|m| m.as_str() != node_id && seen.insert(m.as_str()))
            .cloned()
            .collect()
    }

    fn known_neighbors(&self, entry: &[NodeId]) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut known = Vec::with_capacity(entry.len());

        for peer in entry {
            if peer == &self.node_id || !seen.insert(peer.as_str()) {
                continue;
            }
            if self.members.contains(peer) {
                known.push(peer.clone());
            } else {
                warn!(node_id = %self.node_id, peer = %peer, "Dropping unknown peer from topology");
            }
        }

        known
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members() -> Vec<NodeId> {
        vec!["n1".into(), "n2".into(), "n3".into()]
    }

    fn line_graph() -> Adjacency {
        [
            ("n1".to_string(), vec!["n2".to_string()]),
            ("n2".to_string(), vec!["n1".to_string(), "n3".to_string()]),
            ("n3".to_string(), vec!["n2".to_string()]),
        ]
        .into_iter()
        .collect()
    }

    #[tokio::test]
    async fn test_defaults_to_all_other_members() {
        let manager = TopologyManager::new("n2", members(), TopologyMode::Provided);

        assert_eq!(manager.neighbors().await, vec!["n1", "n3"]);
        assert!(!manager.current().await.explicit);
    }

    #[tokio::test]
    async fn test_configure_uses_local_entry() {
        let manager = TopologyManager::new("n3", members(), TopologyMode::Provided);

        let topology = manager.configure(&line_graph()).await;

        assert_eq!(topology.neighbors, vec!["n2"]);
        assert!(topology.explicit);
        assert_eq!(topology.version, 1);
        assert_eq!(manager.neighbors().await, vec!["n2"]);
    }

    #[tokio::test]
    async fn test_missing_entry_falls_back() {
        let manager = TopologyManager::new("n3", members(), TopologyMode::Provided);
        let adjacency: Adjacency = [("n1".to_string(), vec!["n2".to_string()])]
            .into_iter()
            .collect();

        let topology = manager.configure(&adjacency).await;

        assert_eq!(topology.neighbors, vec!["n1", "n2"]);
        assert!(!topology.explicit);
    }

    #[tokio::test]
    async fn test_self_and_unknown_peers_are_dropped() {
        let manager = TopologyManager::new("n1", members(), TopologyMode::Provided);
        let adjacency: Adjacency = [(
            "n1".to_string(),
            vec!["n1".into(), "n9".into(), "n3".into(), "n3".into()],
        )]
        .into_iter()
        .collect();

        assert_eq!(manager.configure(&adjacency).await.neighbors, vec!["n3"]);
    }

    #[tokio::test]
    async fn test_only_unknown_peers_falls_back() {
        let manager = TopologyManager::new("n1", members(), TopologyMode::Provided);
        let adjacency: Adjacency = [("n1".to_string(), vec!["n7".into(), "n8".into()])]
            .into_iter()
            .collect();

        assert_eq!(manager.configure(&adjacency).await.neighbors, vec!["n2", "n3"]);
    }

    #[tokio::test]
    async fn test_empty_entry_isolates_node() {
        let manager = TopologyManager::new("n1", members(), TopologyMode::Provided);
        let adjacency: Adjacency = [("n1".to_string(), Vec::new())].into_iter().collect();

        let topology = manager.configure(&adjacency).await;

        assert!(topology.neighbors.is_empty());
        assert!(topology.explicit);
    }

    #[tokio::test]
    async fn test_full_mesh_mode_ignores_topology() {
        let manager = TopologyManager::new("n3", members(), TopologyMode::FullMesh);

        let topology = manager.configure(&line_graph()).await;

        assert_eq!(topology.neighbors, vec!["n1", "n2"]);
        assert_eq!(topology.version, 0);
    }

    #[test]
    fn test_topology_mode_parsing() {
        assert_eq!("provided".parse::<TopologyMode>(), Ok(TopologyMode::Provided));
        assert_eq!("full-mesh".parse::<TopologyMode>(), Ok(TopologyMode::FullMesh));
        assert!("ring".parse::<TopologyMode>().is_err());
    }
}
