use serde_json::{json, Value as Json};
use somacast::{stdio, NodeConfig, NodeStats};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

struct Harness {
    input: Option<DuplexStream>,
    output: Lines<BufReader<DuplexStream>>,
    runtime: JoinHandle<somacast::Result<Option<NodeStats>>>,
}

impl Harness {
    fn start() -> Self {
        let (input, node_input) = tokio::io::duplex(64 * 1024);
        let (node_output, output) = tokio::io::duplex(64 * 1024);
        let runtime = tokio::spawn(stdio::run_with_io(
            BufReader::new(node_input),
            node_output,
            NodeConfig::default(),
        ));

        Self {
            input: Some(input),
            output: BufReader::new(output).lines(),
            runtime,
        }
    }

    async fn send(&mut self, message: Json) {
        let mut line = message.to_string();
        line.push('\n');
        let input = self.input.as_mut().unwrap();
        input.write_all(line.as_bytes()).await.unwrap();
        input.flush().await.unwrap();
    }

    async fn send_raw(&mut self, line: &str) {
        let input = self.input.as_mut().unwrap();
        input.write_all(line.as_bytes()).await.unwrap();
        input.write_all(b"\n").await.unwrap();
    }

    async fn recv(&mut self) -> Json {
        let line = timeout(Duration::from_secs(2), self.output.next_line())
            .await
            .expect("timed out waiting for output")
            .unwrap()
            .expect("output closed");
        serde_json::from_str(&line).unwrap()
    }

    async fn finish(mut self) -> Option<NodeStats> {
        drop(self.input.take());
        let stats = timeout(Duration::from_secs(2), self.runtime)
            .await
            .expect("runtime did not stop after end of input")
            .unwrap()
            .unwrap();
        assert!(self.output.next_line().await.unwrap().is_none());
        stats
    }
}

async fn init(harness: &mut Harness, node_id: &str, members: &[&str]) {
    harness
        .send(json!({
            "src": "c0",
            "dest": node_id,
            "body": {"type": "init", "msg_id": 1, "node_id": node_id, "node_ids": members}
        }))
        .await;
    let reply = harness.recv().await;
    assert_eq!(reply["body"]["type"], "init_ok");
    assert_eq!(reply["body"]["in_reply_to"], 1);
}

#[tokio::test]
async fn test_client_session() {
    let mut harness = Harness::start();
    init(&mut harness, "n1", &["n1"]).await;

    harness
        .send(json!({"src": "c1", "dest": "n1", "body": {"type": "broadcast", "msg_id": 2, "message": 12}}))
        .await;
    let reply = harness.recv().await;
    assert_eq!(reply["src"], "n1");
    assert_eq!(reply["dest"], "c1");
    assert_eq!(reply["body"]["type"], "broadcast_ok");
    assert_eq!(reply["body"]["in_reply_to"], 2);

    harness
        .send(json!({"src": "c1", "dest": "n1", "body": {"type": "broadcast", "msg_id": 3, "message": -4}}))
        .await;
    assert_eq!(harness.recv().await["body"]["type"], "broadcast_ok");

    harness
        .send(json!({"src": "c1", "dest": "n1", "body": {"type": "read", "msg_id": 4}}))
        .await;
    let reply = harness.recv().await;
    assert_eq!(reply["body"]["type"], "read_ok");
    assert_eq!(reply["body"]["messages"], json!([-4, 12]));

    harness
        .send(json!({"src": "c1", "dest": "n1", "body": {"type": "topology", "msg_id": 5, "topology": {"n1": []}}}))
        .await;
    assert_eq!(harness.recv().await["body"]["type"], "topology_ok");

    let stats = harness.finish().await.unwrap();
    assert_eq!(stats.node_id, "n1");
    assert_eq!(stats.known_values, 2);
    assert_eq!(stats.reads_served, 1);
}

#[tokio::test]
async fn test_peer_fan_out_is_written_without_msg_id() {
    let mut harness = Harness::start();
    init(&mut harness, "n1", &["n1", "n2", "n3"]).await;

    harness
        .send(json!({"src": "c1", "dest": "n1", "body": {"type": "broadcast", "msg_id": 2, "message": 9}}))
        .await;

    let mut peers = Vec::new();
    let mut acked = false;
    for _ in 0..3 {
        let line = harness.recv().await;
        match line["body"]["type"].as_str() {
            Some("broadcast_ok") => {
                assert_eq!(line["dest"], "c1");
                acked = true;
            }
            Some("broadcast") => {
                assert_eq!(line["src"], "n1");
                assert_eq!(line["body"]["message"], 9);
                assert!(line["body"].get("msg_id").is_none());
                peers.push(line["dest"].as_str().unwrap().to_string());
            }
            other => panic!("unexpected output {:?}", other),
        }
    }
    peers.sort();
    assert!(acked);
    assert_eq!(peers, vec!["n2", "n3"]);

    // A peer echoing the value back is absorbed without further traffic.
    harness
        .send(json!({"src": "n2", "dest": "n1", "body": {"type": "broadcast", "message": 9}}))
        .await;

    let stats = harness.finish().await.unwrap();
    assert_eq!(stats.gossip.values_observed, 1);
    assert_eq!(stats.gossip.duplicates_absorbed, 1);
    assert_eq!(stats.gossip.fanout_sends, 2);
}

#[tokio::test]
async fn test_bad_requests_get_error_replies() {
    let mut harness = Harness::start();
    init(&mut harness, "n1", &["n1"]).await;

    harness
        .send(json!({"src": "c1", "dest": "n1", "body": {"type": "broadcast", "msg_id": 2}}))
        .await;
    let reply = harness.recv().await;
    assert_eq!(reply["body"]["type"], "error");
    assert_eq!(reply["body"]["code"], 12);
    assert_eq!(reply["body"]["in_reply_to"], 2);
    assert_eq!(reply["src"], "n1");

    harness
        .send(json!({"src": "c1", "dest": "n1", "body": {"type": "txn", "msg_id": 3, "txn": []}}))
        .await;
    let reply = harness.recv().await;
    assert_eq!(reply["body"]["code"], 10);
    assert_eq!(reply["body"]["in_reply_to"], 3);

    harness.send_raw("{not json").await;
    harness
        .send(json!({"src": "c0", "dest": "n1", "body": {"type": "init", "msg_id": 4, "node_id": "n1", "node_ids": ["n1"]}}))
        .await;
    let reply = harness.recv().await;
    assert_eq!(reply["body"]["code"], 22);
    assert_eq!(reply["body"]["in_reply_to"], 4);

    harness
        .send(json!({"src": "c1", "dest": "n1", "body": {"type": "generate", "msg_id": 5}}))
        .await;
    let reply = harness.recv().await;
    assert_eq!(reply["body"]["type"], "generate_ok");
    assert!(reply["body"]["id"].as_str().is_some());

    let stats = harness.finish().await.unwrap();
    assert_eq!(stats.known_values, 0);
}
