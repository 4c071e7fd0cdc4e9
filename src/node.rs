//! Broadcast node
//!
//! [`BroadcastNode`] owns all per-node state (dedup store, topology, engine)
//! and routes inbound envelopes to the matching handler. It is built once per
//! node and shared by `Arc` with every handler task, so several nodes can
//! live side by side in one process.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dedup::DedupStore;
use crate::error::ErrorCode;
use crate::gossip::{GossipConfig, GossipEngine, GossipStats};
use crate::mesh::{NetworkTopology, TopologyManager, TopologyMode};
use crate::message::{Adjacency, Envelope, NodeId, Payload, Value};
use crate::transport::Transport;
use crate::Result;

/// Configuration for a broadcast node
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    /// Dissemination engine settings
    pub gossip: GossipConfig,
    /// Treatment of supplied topologies
    pub topology_mode: TopologyMode,
}

/// Statistics for one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStats {
    pub node_id: NodeId,
    /// Distinct values currently known
    pub known_values: usize,
    /// `read` requests answered
    pub reads_served: u64,
    /// Version of the installed topology
    pub topology_version: u64,
    pub gossip: GossipStats,
}

/// A single member of the broadcast cluster
pub struct BroadcastNode<T: Transport> {
    node_id: NodeId,
    config: NodeConfig,
    transport: Arc<T>,
    store: Arc<DedupStore<Value>>,
    topology: Arc<TopologyManager>,
    gossip: GossipEngine<T>,
    reads_served: AtomicU64,
}

impl<T: Transport> BroadcastNode<T> {
    /// Create a node bound to `transport`
    pub fn new(transport: Arc<T>, config: NodeConfig) -> Result<Self> {
        let node_id = transport.node_id().to_string();
        let store = Arc::new(DedupStore::new());
        let topology = Arc::new(TopologyManager::new(
            node_id.clone(),
            transport.peers().to_vec(),
            config.topology_mode,
        ));
        let gossip = GossipEngine::new(
            Arc::clone(&transport),
            Arc::clone(&store),
            Arc::clone(&topology),
            config.gossip.clone(),
        )?;

        info!(
            node_id = %node_id,
            members = transport.peers().len(),
            max_in_flight_sends = config.gossip.max_in_flight_sends,
            topology_mode = ?config.topology_mode,
            "Broadcast node created"
        );

        Ok(Self {
            node_id,
            config,
            transport,
            store,
            topology,
            gossip,
            reads_served: AtomicU64::new(0),
        })
    }

    /// Dispatch one inbound envelope
    pub async fn handle(&self, envelope: Envelope) -> Result<()> {
        match &envelope.body.payload {
            Payload::Broadcast { message } => self.handle_broadcast(&envelope, *message).await,
            Payload::Read => self.handle_read(&envelope).await,
            Payload::Topology { topology } => self.handle_topology(&envelope, topology).await,
            Payload::Generate => self.handle_generate(&envelope).await,
            Payload::Init { .. } => {
                warn!(node_id = %self.node_id, src = %envelope.src, "Rejecting repeated init");
                self.respond(
                    &envelope,
                    Payload::error(ErrorCode::PreconditionFailed, "node already initialised"),
                )
                .await
            }
            Payload::Error { code, text } => {
                warn!(
                    node_id = %self.node_id,
                    src = %envelope.src,
                    code = ?code,
                    "Peer reported error: {}",
                    text
                );
                Ok(())
            }
            Payload::InitOk
            | Payload::BroadcastOk
            | Payload::ReadOk { .. }
            | Payload::TopologyOk
            | Payload::GenerateOk { .. } => {
                debug!(
                    node_id = %self.node_id,
                    src = %envelope.src,
                    kind = envelope.body.payload.kind(),
                    "Ignoring unsolicited reply"
                );
                Ok(())
            }
        }
    }

    /// Process every envelope from `inbox`, one task per message.
    ///
    /// Returns once the channel is closed and every handler task has
    /// finished. Fan-out sends started by those handlers may still be running.
    pub async fn serve(self: Arc<Self>, mut inbox: mpsc::UnboundedReceiver<Envelope>) {
        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                received = inbox.recv() => match received {
                    Some(envelope) => {
                        let node = Arc::clone(&self);
                        handlers.spawn(async move { node.dispatch(envelope).await });
                    }
                    None => break,
                },
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    self.reap(joined);
                }
            }
        }

        while let Some(joined) = handlers.join_next().await {
            self.reap(joined);
        }
        debug!(node_id = %self.node_id, "Inbox closed");
    }

    async fn dispatch(&self, envelope: Envelope) {
        let kind = envelope.body.payload.kind();
        let src = envelope.src.clone();
        if let Err(e) = self.handle(envelope).await {
            error!(node_id = %self.node_id, src = %src, kind, "Failed to handle message: {}", e);
        }
    }

    fn reap(&self, joined: std::result::Result<(), JoinError>) {
        if let Err(e) = joined {
            error!(node_id = %self.node_id, "Handler task failed: {}", e);
        }
    }

    /// Every value observed so far
    pub async fn read(&self) -> HashSet<Value> {
        self.store.snapshot().await
    }

    /// Install a cluster-wide adjacency
    pub async fn configure_topology(&self, adjacency: &Adjacency) -> NetworkTopology {
        self.topology.configure(adjacency).await
    }

    /// Current fan-out targets
    pub async fn neighbors(&self) -> Vec<NodeId> {
        self.topology.neighbors().await
    }

    /// Snapshot of node and dissemination counters
    pub async fn stats(&self) -> NodeStats {
        NodeStats {
            node_id: self.node_id.clone(),
            known_values: self.store.len().await,
            reads_served: self.reads_served.load(Ordering::Relaxed),
            topology_version: self.topology.current().await.version,
            gossip: self.gossip.stats(),
        }
    }

    /// Identifier assigned at bootstrap
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Configuration the node was built with
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    async fn handle_broadcast(&self, request: &Envelope, value: Value) -> Result<()> {
        let novel = self.gossip.observe(value).await;

        // Acknowledge receipt before any neighbor send is attempted.
        let replied = self.respond(request, Payload::BroadcastOk).await;

        if novel {
            self.gossip.fan_out(value, &request.src).await;
        }

        replied
    }

    async fn handle_read(&self, request: &Envelope) -> Result<()> {
        let mut messages: Vec<Value> = self.read().await.into_iter().collect();
        messages.sort_unstable();
        self.reads_served.fetch_add(1, Ordering::Relaxed);

        self.respond(request, Payload::ReadOk { messages }).await
    }

    async fn handle_topology(&self, request: &Envelope, adjacency: &Adjacency) -> Result<()> {
        self.configure_topology(adjacency).await;
        self.respond(request, Payload::TopologyOk).await
    }

    async fn handle_generate(&self, request: &Envelope) -> Result<()> {
        let id = Uuid::new_v4().to_string();
        self.respond(request, Payload::GenerateOk { id }).await
    }

    async fn respond(&self, request: &Envelope, payload: Payload) -> Result<()> {
        if !request.expects_reply() {
            return Ok(());
        }
        self.transport.reply(request, payload).await
    }
}

/// Builder for creating and configuring broadcast nodes
#[derive(Debug, Clone, Default)]
pub struct BroadcastNodeBuilder {
    config: NodeConfig,
}

impl BroadcastNodeBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    /// Cap concurrently running fan-out sends
    pub fn with_max_in_flight_sends(mut self, limit: usize) -> Self {
        self.config.gossip.max_in_flight_sends = limit;
        self
    }

    /// Choose how supplied topologies are applied
    pub fn with_topology_mode(mut self, mode: TopologyMode) -> Self {
        self.config.topology_mode = mode;
        self
    }

    /// Build the node on top of `transport`
    pub fn build<T: Transport>(self, transport: Arc<T>) -> Result<Arc<BroadcastNode<T>>> {
        BroadcastNode::new(transport, self.config).map(Arc::new)
    }
}
