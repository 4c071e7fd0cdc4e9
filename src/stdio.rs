//! Line-delimited JSON runtime over standard input and output
//!
//! This is the process-level transport: the cluster harness writes one
//! envelope per line to stdin and reads replies and peer traffic from
//! stdout. The first message must be `init`, which assigns the node its
//! identity and the membership list; only then is the broadcast node built.
//!
//! All output funnels through a single writer task so that lines produced by
//! concurrent handlers never interleave.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{CastError, ErrorCode};
use crate::message::{Body, DecodeFailure, Envelope, NodeId, Payload};
use crate::node::{BroadcastNodeBuilder, NodeConfig, NodeStats};
use crate::transport::Transport;
use crate::Result;

/// Transport writing envelopes to the shared output stream
pub struct StdioTransport {
    node_id: NodeId,
    peers: Vec<NodeId>,
    outbound: mpsc::UnboundedSender<Envelope>,
    next_msg_id: AtomicU64,
}

impl StdioTransport {
    fn new(node_id: NodeId, peers: Vec<NodeId>, outbound: mpsc::UnboundedSender<Envelope>) -> Self {
        Self {
            node_id,
            peers,
            outbound,
            next_msg_id: AtomicU64::new(1),
        }
    }

    fn emit(&self, envelope: Envelope) -> Result<()> {
        let dest = envelope.dest.clone();
        self.outbound
            .send(envelope)
            .map_err(|_| CastError::transport("output stream closed", dest))
    }
}

impl Transport for StdioTransport {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn peers(&self) -> &[NodeId] {
        &self.peers
    }

    async fn send(&self, dest: &str, body: Body) -> Result<()> {
        self.emit(Envelope::new(self.node_id.clone(), dest, body))
    }

    async fn reply(&self, request: &Envelope, payload: Payload) -> Result<()> {
        let body = Body::new(payload)
            .with_msg_id(self.next_msg_id.fetch_add(1, Ordering::Relaxed))
            .with_in_reply_to(request.body.msg_id);
        self.emit(Envelope::new(
            self.node_id.clone(),
            request.src.clone(),
            body,
        ))
    }
}

/// Serve a node over the process's stdin and stdout
pub async fn run(config: NodeConfig) -> Result<Option<NodeStats>> {
    run_with_io(
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        config,
    )
    .await
}

/// Serve a node over arbitrary line-oriented streams.
///
/// Returns once `reader` reaches end of input and every pending reply and
/// fan-out send has been written. The result carries the final node
/// statistics, or `None` if input ended before `init`.
pub async fn run_with_io<R, W>(reader: R, writer: W, config: NodeConfig) -> Result<Option<NodeStats>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_lines(writer, outbound_rx));
    let mut lines = reader.lines();

    let transport = loop {
        let Some(line) = lines.next_line().await? else {
            info!("Input closed before init");
            drop(outbound_tx);
            writer_task.await??;
            return Ok(None);
        };
        if line.trim().is_empty() {
            continue;
        }

        match Envelope::decode(&line) {
            Ok(envelope) => {
                if let Payload::Init { node_id, node_ids } = &envelope.body.payload {
                    let transport = Arc::new(StdioTransport::new(
                        node_id.clone(),
                        node_ids.clone(),
                        outbound_tx.clone(),
                    ));
                    transport.reply(&envelope, Payload::InitOk).await?;
                    info!(node_id = %node_id, members = ?node_ids, "Node initialised");
                    break transport;
                }

                warn!(
                    src = %envelope.src,
                    kind = envelope.body.payload.kind(),
                    "Message received before init"
                );
                if envelope.expects_reply() {
                    let body = Body::new(Payload::error(
                        ErrorCode::TemporarilyUnavailable,
                        "node not initialised",
                    ))
                    .with_in_reply_to(envelope.body.msg_id);
                    let reply = Envelope::new(envelope.dest, envelope.src, body);
                    if outbound_tx.send(reply).is_err() {
                        warn!("Output stream closed, dropping error reply");
                    }
                }
            }
            Err(failure) => reject(&outbound_tx, failure, None),
        }
    };

    let node = BroadcastNodeBuilder::new()
        .with_config(config)
        .build(Arc::clone(&transport))?;
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    let serve_task = tokio::spawn(Arc::clone(&node).serve(inbox_rx));

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match Envelope::decode(&line) {
            Ok(envelope) => {
                if inbox_tx.send(envelope).is_err() {
                    warn!(node_id = %node.node_id(), "Inbox closed, stopping input loop");
                    break;
                }
            }
            Err(failure) => reject(&outbound_tx, failure, Some(node.node_id())),
        }
    }

    drop(inbox_tx);
    serve_task.await?;

    let stats = node.stats().await;
    info!(
        node_id = %stats.node_id,
        known_values = stats.known_values,
        reads_served = stats.reads_served,
        values_observed = stats.gossip.values_observed,
        duplicates_absorbed = stats.gossip.duplicates_absorbed,
        fanout_sends = stats.gossip.fanout_sends,
        fanout_failures = stats.gossip.fanout_failures,
        "Input closed, draining output"
    );

    // The writer stops once the last sender is gone, which includes every
    // handler and fan-out task still holding the transport.
    drop(node);
    drop(transport);
    drop(outbound_tx);
    writer_task.await??;

    Ok(Some(stats))
}

fn reject(outbound: &mpsc::UnboundedSender<Envelope>, failure: DecodeFailure, local_id: Option<&str>) {
    warn!(code = ?failure.code, src = ?failure.src, "Rejecting message: {}", failure.text);

    match failure.into_reply(local_id) {
        Some(reply) => {
            if outbound.send(reply).is_err() {
                warn!("Output stream closed, dropping error reply");
            }
        }
        None => debug!("Rejected message carried no reply address"),
    }
}

async fn write_lines<W>(mut writer: W, mut outbound: mpsc::UnboundedReceiver<Envelope>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(envelope) = outbound.recv().await {
        let mut line = match envelope.encode() {
            Ok(line) => line,
            Err(e) => {
                warn!(dest = %envelope.dest, "Failed to encode outbound message: {}", e);
                continue;
            }
        };
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }

    writer.shutdown().await?;
    Ok(())
}
