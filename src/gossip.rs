//! Dissemination engine
//!
//! Every broadcast value a node receives goes through [`GossipEngine::observe`].
//! The first observation of a value is the only one that triggers a fan-out,
//! which is what stops re-broadcast storms: once every node has seen a value,
//! further copies are absorbed at the cost of one lock and one set lookup.
//!
//! Fan-out is fire-and-forget. Each neighbor send runs in its own task and a
//! failure towards one neighbor never affects the others. The number of sends
//! in flight at once is capped by a semaphore.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::dedup::DedupStore;
use crate::error::CastError;
use crate::mesh::TopologyManager;
use crate::message::{Body, NodeId, Payload, Value};
use crate::transport::Transport;

/// Configuration for the dissemination engine
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Upper bound on concurrently running neighbor sends
    pub max_in_flight_sends: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            max_in_flight_sends: 256,
        }
    }
}

impl GossipConfig {
    /// Check that the send limit is usable as a semaphore size
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_in_flight_sends == 0 {
            return Err(CastError::config("max_in_flight_sends must be at least 1"));
        }
        if self.max_in_flight_sends > Semaphore::MAX_PERMITS {
            return Err(CastError::config(format!(
                "max_in_flight_sends must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct GossipCounters {
    values_observed: AtomicU64,
    duplicates_absorbed: AtomicU64,
    fanout_sends: AtomicU64,
    fanout_failures: AtomicU64,
}

/// Dissemination statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GossipStats {
    /// Distinct values that triggered a fan-out
    pub values_observed: u64,
    /// Deliveries dropped because the value was already known
    pub duplicates_absorbed: u64,
    /// Neighbor sends the transport accepted
    pub fanout_sends: u64,
    /// Neighbor sends the transport rejected
    pub fanout_failures: u64,
    /// Neighbor sends currently running
    pub in_flight_sends: usize,
}

/// Per-node dissemination engine
pub struct GossipEngine<T: Transport> {
    node_id: NodeId,
    transport: Arc<T>,
    store: Arc<DedupStore<Value>>,
    topology: Arc<TopologyManager>,
    config: GossipConfig,
    send_permits: Arc<Semaphore>,
    counters: Arc<GossipCounters>,
}

impl<T: Transport> GossipEngine<T> {
    /// Create an engine, rejecting an invalid `config`
    pub fn new(
        transport: Arc<T>,
        store: Arc<DedupStore<Value>>,
        topology: Arc<TopologyManager>,
        config: GossipConfig,
    ) -> crate::Result<Self> {
        config.validate()?;
        let send_permits = Arc::new(Semaphore::new(config.max_in_flight_sends));

        Ok(Self {
            node_id: transport.node_id().to_string(),
            transport,
            store,
            topology,
            config,
            send_permits,
            counters: Arc::new(GossipCounters::default()),
        })
    }

    /// Record `value`; returns `true` if this node had never seen it.
    ///
    /// A `true` result obliges the caller to call [`fan_out`](Self::fan_out)
    /// exactly once for this value.
    pub async fn observe(&self, value: Value) -> bool {
        let novel = self.store.observe(value).await;

        if novel {
            self.counters.values_observed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters
                .duplicates_absorbed
                .fetch_add(1, Ordering::Relaxed);
            debug!(node_id = %self.node_id, value, "Absorbed duplicate broadcast");
        }

        novel
    }

    /// Send `value` to every neighbor except `sender` and self.
    ///
    /// Returns the number of sends dispatched. Sends run in background tasks;
    /// this never waits for any of them.
    pub async fn fan_out(&self, value: Value, sender: &str) -> usize {
        let targets: Vec<NodeId> = self
            .topology
            .neighbors()
            .await
            .into_iter()
            .filter(|peer| peer.as_str() != sender && *peer != self.node_id)
            .collect();

        debug!(
            node_id = %self.node_id,
            value,
            sender,
            targets = ?targets,
            "Fanning out broadcast"
        );

        let dispatched = targets.len();
        for dest in targets {
            self.spawn_send(dest, value);
        }

        dispatched
    }

    fn spawn_send(&self, dest: NodeId, value: Value) {
        let transport = Arc::clone(&self.transport);
        let permits = Arc::clone(&self.send_permits);
        let counters = Arc::clone(&self.counters);
        let node_id = self.node_id.clone();

        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(node_id = %node_id, dest = %dest, "Send limiter closed, dropping fan-out");
                    return;
                }
            };

            let body = Body::new(Payload::Broadcast { message: value });
            match transport.send(&dest, body).await {
                Ok(()) => {
                    counters.fanout_sends.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.fanout_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(node_id = %node_id, dest = %dest, value, "Fan-out send failed: {}", e);
                }
            }
        });
    }

    /// Snapshot of the engine counters
    pub fn stats(&self) -> GossipStats {
        GossipStats {
            values_observed: self.counters.values_observed.load(Ordering::Relaxed),
            duplicates_absorbed: self.counters.duplicates_absorbed.load(Ordering::Relaxed),
            fanout_sends: self.counters.fanout_sends.load(Ordering::Relaxed),
            fanout_failures: self.counters.fanout_failures.load(Ordering::Relaxed),
            in_flight_sends: self
                .config
                .max_in_flight_sends
                .saturating_sub(self.send_permits.available_permits()),
        }
    }

    /// Configuration the engine was built with
    pub fn config(&self) -> &GossipConfig {
        &self.config
    }
}
