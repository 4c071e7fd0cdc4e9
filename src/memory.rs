//! In-process network for running whole clusters inside one runtime
//!
//! Every node gets a [`MemoryTransport`] whose sends are routed over tokio
//! channels to the destination's inbox. The network keeps a log of delivered
//! envelopes, can make nodes unreachable, and can simulate lossy links that
//! the transport retries, so the dissemination core can be exercised under
//! the delivery conditions it is designed for.

use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::CastError;
use crate::message::{Body, Envelope, NodeId, Payload, Value};
use crate::node::{BroadcastNode, BroadcastNodeBuilder, NodeConfig};
use crate::transport::Transport;
use crate::Result;

/// How long a [`MemoryClient`] waits for a reply
pub const RPC_TIMEOUT: Duration = Duration::from_secs(2);

/// Link behaviour of a [`MemoryNetwork`]
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Probability that a single delivery attempt is lost
    pub drop_rate: f64,
    /// Attempts the transport makes before reporting a failed send
    pub max_attempts: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            drop_rate: 0.0,
            max_attempts: 1,
        }
    }
}

/// Simulated cluster network
pub struct MemoryNetwork {
    members: Vec<NodeId>,
    link: LinkConfig,
    routes: RwLock<HashMap<NodeId, mpsc::UnboundedSender<Envelope>>>,
    unreachable: RwLock<HashSet<NodeId>>,
    delivered: Mutex<Vec<Envelope>>,
}

impl MemoryNetwork {
    /// Network with perfect links between `members`
    pub fn new(members: &[&str]) -> Arc<Self> {
        Self::with_link(members, LinkConfig::default())
    }

    /// Network whose links follow `link`
    pub fn with_link(members: &[&str], link: LinkConfig) -> Arc<Self> {
        let link = LinkConfig {
            drop_rate: link.drop_rate.clamp(0.0, 1.0),
            max_attempts: link.max_attempts.max(1),
        };

        Arc::new(Self {
            members: members.iter().map(|m| m.to_string()).collect(),
            link,
            routes: RwLock::new(HashMap::new()),
            unreachable: RwLock::new(HashSet::new()),
            delivered: Mutex::new(Vec::new()),
        })
    }

    /// Start a node with the given identity and serve its inbox
    pub async fn spawn_node(
        self: &Arc<Self>,
        node_id: &str,
        config: NodeConfig,
    ) -> Result<Arc<BroadcastNode<MemoryTransport>>> {
        if !self.members.iter().any(|m| m == node_id) {
            return Err(CastError::config(format!(
                "{} is not a member of this network",
                node_id
            )));
        }

        let transport = Arc::new(MemoryTransport {
            node_id: node_id.to_string(),
            peers: self.members.clone(),
            network: Arc::clone(self),
            next_msg_id: AtomicU64::new(1),
        });
        let node = BroadcastNodeBuilder::new()
            .with_config(config)
            .build(transport)?;

        let inbox = self.register(node_id).await;
        tokio::spawn(Arc::clone(&node).serve(inbox));

        info!(node_id, "Memory node started");
        Ok(node)
    }

    /// Start every member with the same configuration
    pub async fn spawn_cluster(
        self: &Arc<Self>,
        config: NodeConfig,
    ) -> Result<HashMap<NodeId, Arc<BroadcastNode<MemoryTransport>>>> {
        let mut nodes = HashMap::new();
        for member in &self.members {
            let node = self.spawn_node(member, config.clone()).await?;
            nodes.insert(member.clone(), node);
        }
        Ok(nodes)
    }

    /// Register an external client that can issue requests
    pub async fn client(self: &Arc<Self>, client_id: &str) -> MemoryClient {
        let inbox = self.register(client_id).await;
        MemoryClient {
            client_id: client_id.to_string(),
            network: Arc::clone(self),
            inbox: Mutex::new(inbox),
            next_msg_id: AtomicU64::new(1),
        }
    }

    /// Make sends towards `node_id` fail (or succeed again)
    pub async fn set_reachable(&self, node_id: &str, reachable: bool) {
        let mut unreachable = self.unreachable.write().await;
        if reachable {
            unreachable.remove(node_id);
        } else {
            unreachable.insert(node_id.to_string());
        }
    }

    /// Every envelope handed to a recipient so far
    pub async fn delivered(&self) -> Vec<Envelope> {
        self.delivered.lock().await.clone()
    }

    /// Delivered peer-to-peer broadcasts as `(src, dest, value)`
    pub async fn gossip_log(&self) -> Vec<(NodeId, NodeId, Value)> {
        self.delivered
            .lock()
            .await
            .iter()
            .filter(|env| self.members.contains(&env.src))
            .filter_map(|env| match env.body.payload {
                Payload::Broadcast { message } => {
                    Some((env.src.clone(), env.dest.clone(), message))
                }
                _ => None,
            })
            .collect()
    }

    async fn register(&self, id: &str) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.write().await.insert(id.to_string(), tx);
        rx
    }

    async fn route(&self, envelope: Envelope) -> Result<()> {
        if self.unreachable.read().await.contains(&envelope.dest) {
            return Err(CastError::transport("destination unreachable", &envelope.dest));
        }

        if !self.attempt_delivery() {
            debug!(src = %envelope.src, dest = %envelope.dest, "Link lost every attempt");
            return Err(CastError::transport(
                format!("lost after {} attempts", self.link.max_attempts),
                &envelope.dest,
            ));
        }

        let tx = self
            .routes
            .read()
            .await
            .get(&envelope.dest)
            .cloned()
            .ok_or_else(|| CastError::transport("unknown destination", &envelope.dest))?;

        self.delivered.lock().await.push(envelope.clone());
        let dest = envelope.dest.clone();
        tx.send(envelope)
            .map_err(|_| CastError::transport("inbox closed", dest))
    }

    fn attempt_delivery(&self) -> bool {
        if self.link.drop_rate <= 0.0 {
            return true;
        }
        let mut rng = rand::thread_rng();
        (0..self.link.max_attempts).any(|_| !rng.gen_bool(self.link.drop_rate))
    }
}

/// Transport handle given to each in-process node
pub struct MemoryTransport {
    node_id: NodeId,
    peers: Vec<NodeId>,
    network: Arc<MemoryNetwork>,
    next_msg_id: AtomicU64,
}

impl Transport for MemoryTransport {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn peers(&self) -> &[NodeId] {
        &self.peers
    }

    async fn send(&self, dest: &str, body: Body) -> Result<()> {
        self.network
            .route(Envelope::new(self.node_id.clone(), dest, body))
            .await
    }

    async fn reply(&self, request: &Envelope, payload: Payload) -> Result<()> {
        let body = Body::new(payload)
            .with_msg_id(self.next_msg_id.fetch_add(1, Ordering::Relaxed))
            .with_in_reply_to(request.body.msg_id);
        self.network
            .route(Envelope::new(self.node_id.clone(), request.src.clone(), body))
            .await
    }
}

/// External client attached to a [`MemoryNetwork`]
pub struct MemoryClient {
    client_id: NodeId,
    network: Arc<MemoryNetwork>,
    inbox: Mutex<mpsc::UnboundedReceiver<Envelope>>,
    next_msg_id: AtomicU64,
}

impl MemoryClient {
    /// Send `payload` to `dest` and wait for the correlated reply
    pub async fn rpc(&self, dest: &str, payload: Payload) -> Result<Payload> {
        let msg_id = self.next_msg_id.fetch_add(1, Ordering::Relaxed);
        let body = Body::new(payload).with_msg_id(msg_id);

        let mut inbox = self.inbox.lock().await;
        self.network
            .route(Envelope::new(self.client_id.clone(), dest, body))
            .await?;

        let wait = async {
            while let Some(envelope) = inbox.recv().await {
                if envelope.body.in_reply_to == Some(msg_id) {
                    return Some(envelope.body.payload);
                }
            }
            None
        };

        match timeout(RPC_TIMEOUT, wait).await {
            Ok(Some(payload)) => Ok(payload),
            Ok(None) => Err(CastError::transport("client inbox closed", dest)),
            Err(_) => Err(CastError::transport("timed out waiting for reply", dest)),
        }
    }

    /// Address replies are routed to
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}
