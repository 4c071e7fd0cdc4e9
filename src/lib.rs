//! # Somacast - Best-Effort Broadcast for Message-Passing Clusters
//!
//! Somacast disseminates integer values across a fixed cluster of nodes that
//! talk to each other through line-delimited JSON messages. Any node may
//! receive a value from a client; every node that learns a value forwards it
//! once to its gossip neighbors, so all reachable nodes eventually know it.
//!
//! ## Core Features
//!
//! - **At-most-once fan-out**: an atomic observe-and-insert decides the single
//!   fan-out of each value, so duplicate deliveries die out immediately
//! - **Supplied topologies**: neighbors come from the cluster's `topology`
//!   message, with a full-membership fallback
//! - **Fire-and-forget sends**: each neighbor send runs in its own task and
//!   the number of sends in flight is bounded
//! - **Pluggable transports**: a stdin/stdout runtime for real clusters and an
//!   in-memory network for tests and simulations
//!
//! ## Examples
//!
//! ### In-Memory Cluster
//!
//! ```rust,no_run
//! use somacast::{MemoryNetwork, NodeConfig, Payload};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let network = MemoryNetwork::new(&["n1", "n2", "n3"]);
//!     let nodes = network.spawn_cluster(NodeConfig::default()).await?;
//!
//!     let client = network.client("c1").await;
//!     client.rpc("n1", Payload::Broadcast { message: 42 }).await?;
//!
//!     tokio::time::sleep(std::time::Duration::from_millis(50)).await;
//!     assert!(nodes["n3"].read().await.contains(&42));
//!     Ok(())
//! }
//! ```
//!
//! ### Process Runtime
//!
//! ```rust,no_run
//! use somacast::{init_logging, production_config, stdio, NodeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging(&production_config())?;
//!     stdio::run(NodeConfig::default()).await?;
//!     Ok(())
//! }
//! ```

pub mod dedup;
pub mod error;
pub mod gossip;
pub mod logging;
pub mod memory;
pub mod mesh;
pub mod message;
pub mod node;
pub mod stdio;
pub mod transport;

// Re-export main types for convenience
pub use dedup::DedupStore;
pub use error::{CastError, ErrorCode};
pub use gossip::{GossipConfig, GossipEngine, GossipStats};
pub use logging::{development_config, init_logging, production_config, LogConfig};
pub use memory::{LinkConfig, MemoryClient, MemoryNetwork, MemoryTransport};
pub use mesh::{NetworkTopology, TopologyManager, TopologyMode};
pub use message::{Adjacency, Body, DecodeFailure, Envelope, NodeId, Payload, Value};
pub use node::{BroadcastNode, BroadcastNodeBuilder, NodeConfig, NodeStats};
pub use stdio::StdioTransport;
pub use transport::Transport;

/// Result type alias for somacast operations
pub type Result<T> = std::result::Result<T, CastError>;
