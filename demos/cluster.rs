//! Five-node in-memory cluster on a line topology
//!
//! A value injected at one end travels hop by hop to the other end; the
//! example prints each node's view and the peer traffic it took.

use somacast::{development_config, init_logging, MemoryNetwork, NodeConfig, Payload};
use std::collections::HashMap;
use tokio::time::{sleep, Duration};
use tracing::info;

const MEMBERS: [&str; 5] = ["n1", "n2", "n3", "n4", "n5"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(&development_config().with_level("info"))?;

    let network = MemoryNetwork::new(&MEMBERS);
    let nodes = network.spawn_cluster(NodeConfig::default()).await?;
    let client = network.client("c1").await;

    // n1 - n2 - n3 - n4 - n5
    let mut topology = HashMap::new();
    for (i, node) in MEMBERS.iter().enumerate() {
        let mut neighbors = Vec::new();
        if i > 0 {
            neighbors.push(MEMBERS[i - 1].to_string());
        }
        if i + 1 < MEMBERS.len() {
            neighbors.push(MEMBERS[i + 1].to_string());
        }
        topology.insert(node.to_string(), neighbors);
    }
    for node in MEMBERS {
        client
            .rpc(
                node,
                Payload::Topology {
                    topology: topology.clone(),
                },
            )
            .await?;
    }

    for value in [42, 7, 42] {
        let reply = client.rpc("n1", Payload::Broadcast { message: value }).await?;
        info!(value, reply = reply.kind(), "Broadcast accepted by n1");
    }

    sleep(Duration::from_millis(100)).await;

    for node in MEMBERS {
        let mut known: Vec<_> = nodes[node].read().await.into_iter().collect();
        known.sort_unstable();
        let stats = nodes[node].stats().await;
        println!(
            "{}: values={:?} forwarded={} duplicates={}",
            node, known, stats.gossip.fanout_sends, stats.gossip.duplicates_absorbed
        );
    }

    let mut hops = network.gossip_log().await;
    hops.sort();
    for (src, dest, value) in hops {
        println!("{} -> {}: {}", src, dest, value);
    }

    Ok(())
}
