//! Wire protocol for node-to-node and client-to-node communication
//!
//! Every message is a JSON envelope `{src, dest, body}` carried as one line.
//! The body is tagged by its `type` field and may carry a `msg_id` (the
//! sender expects a reply) and an `in_reply_to` (this is a reply).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{CastError, ErrorCode};

/// Broadcast payload value
pub type Value = i64;

/// Node identifier as assigned by the cluster bootstrap
pub type NodeId = String;

/// Adjacency mapping delivered by `topology` requests
pub type Adjacency = HashMap<NodeId, Vec<NodeId>>;

/// Message types understood by a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Bootstrap request assigning identity and membership
    Init {
        node_id: NodeId,
        node_ids: Vec<NodeId>,
    },
    InitOk,
    /// Value to disseminate, from a client or from a peer
    Broadcast { message: Value },
    BroadcastOk,
    /// Request for every value observed so far
    Read,
    ReadOk { messages: Vec<Value> },
    /// Cluster-wide gossip adjacency
    Topology { topology: Adjacency },
    TopologyOk,
    /// Request for a globally unique identifier
    Generate,
    GenerateOk { id: String },
    /// Failure reply
    Error { code: ErrorCode, text: String },
}

impl Payload {
    /// Type names a node accepts, used to classify decode failures
    const KNOWN_TYPES: [&'static str; 11] = [
        "init",
        "init_ok",
        "broadcast",
        "broadcast_ok",
        "read",
        "read_ok",
        "topology",
        "topology_ok",
        "generate",
        "generate_ok",
        "error",
    ];

    /// Wire name of this payload
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Init { .. } => "init",
            Payload::InitOk => "init_ok",
            Payload::Broadcast { .. } => "broadcast",
            Payload::BroadcastOk => "broadcast_ok",
            Payload::Read => "read",
            Payload::ReadOk { .. } => "read_ok",
            Payload::Topology { .. } => "topology",
            Payload::TopologyOk => "topology_ok",
            Payload::Generate => "generate",
            Payload::GenerateOk { .. } => "generate_ok",
            Payload::Error { .. } => "error",
        }
    }

    /// Build an error payload
    pub fn error(code: ErrorCode, text: impl Into<String>) -> Self {
        Payload::Error {
            code,
            text: text.into(),
        }
    }

    /// Whether this payload answers an earlier request
    pub fn is_reply(&self) -> bool {
        matches!(
            self,
            Payload::InitOk
                | Payload::BroadcastOk
                | Payload::ReadOk { .. }
                | Payload::TopologyOk
                | Payload::GenerateOk { .. }
                | Payload::Error { .. }
        )
    }

    fn is_known_type(kind: &str) -> bool {
        Self::KNOWN_TYPES.contains(&kind)
    }
}

/// Message body: correlation ids plus the typed payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Body {
    /// Body that expects no reply
    pub fn new(payload: Payload) -> Self {
        Self {
            msg_id: None,
            in_reply_to: None,
            payload,
        }
    }

    /// Ask the receiver for a reply correlated by `msg_id`
    pub fn with_msg_id(mut self, msg_id: u64) -> Self {
        self.msg_id = Some(msg_id);
        self
    }

    /// Mark this body as the answer to `in_reply_to`
    pub fn with_in_reply_to(mut self, in_reply_to: Option<u64>) -> Self {
        self.in_reply_to = in_reply_to;
        self
    }
}

/// Addressed message as it travels between processes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub src: NodeId,
    pub dest: NodeId,
    pub body: Body,
}

impl Envelope {
    /// Address `body` from `src` to `dest`
    pub fn new(src: impl Into<NodeId>, dest: impl Into<NodeId>, body: Body) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
            body,
        }
    }

    /// Whether the sender is waiting for an answer
    pub fn expects_reply(&self) -> bool {
        self.body.msg_id.is_some()
    }

    /// Decode one line of input.
    ///
    /// On failure the returned [`DecodeFailure`] keeps whatever addressing
    /// information could be recovered so the caller can still answer with an
    /// `error` reply.
    pub fn decode(line: &str) -> std::result::Result<Self, DecodeFailure> {
        let raw: serde_json::Value =
            serde_json::from_str(line).map_err(|e| DecodeFailure {
                src: None,
                dest: None,
                msg_id: None,
                code: ErrorCode::MalformedRequest,
                text: format!("invalid JSON: {}", e),
            })?;

        Envelope::deserialize(&raw).map_err(|e| DecodeFailure::from_raw(&raw, e))
    }

    /// Encode as a single JSON line, without the trailing newline
    pub fn encode(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(CastError::from)
    }
}

/// An inbound line that could not be turned into an [`Envelope`]
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeFailure {
    pub src: Option<NodeId>,
    pub dest: Option<NodeId>,
    pub msg_id: Option<u64>,
    pub code: ErrorCode,
    pub text: String,
}

impl DecodeFailure {
    fn from_raw(raw: &serde_json::Value, error: serde_json::Error) -> Self {
        let field = |name: &str| raw.get(name).and_then(|v| v.as_str()).map(str::to_string);
        let body = raw.get("body");
        let kind = body.and_then(|b| b.get("type")).and_then(|t| t.as_str());

        let code = match kind {
            Some(kind) if !Payload::is_known_type(kind) => ErrorCode::NotSupported,
            _ => ErrorCode::MalformedRequest,
        };
        let text = match (code, kind) {
            (ErrorCode::NotSupported, Some(kind)) => format!("unsupported message type {:?}", kind),
            _ => format!("malformed message: {}", error),
        };

        Self {
            src: field("src"),
            dest: field("dest"),
            msg_id: body.and_then(|b| b.get("msg_id")).and_then(|id| id.as_u64()),
            code,
            text,
        }
    }

    /// Build the `error` reply for this failure.
    ///
    /// Returns `None` when the sender or its `msg_id` could not be recovered,
    /// since nobody is waiting for an answer then. `local_id` names the
    /// replying node; without it the address the sender used is reused.
    pub fn into_reply(self, local_id: Option<&str>) -> Option<Envelope> {
        let (dest, msg_id) = match (self.src, self.msg_id) {
            (Some(dest), Some(msg_id)) => (dest, msg_id),
            _ => return None,
        };
        let src = local_id
            .map(str::to_string)
            .or(self.dest)
            .unwrap_or_default();
        let body = Body::new(Payload::error(self.code, self.text)).with_in_reply_to(Some(msg_id));

        Some(Envelope::new(src, dest, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_client_broadcast() {
        let env = Envelope::decode(
            r#"{"src":"c1","dest":"n1","body":{"type":"broadcast","msg_id":7,"message":42}}"#,
        )
        .unwrap();

        assert_eq!(env.src, "c1");
        assert_eq!(env.dest, "n1");
        assert_eq!(env.body.msg_id, Some(7));
        assert_eq!(env.body.payload, Payload::Broadcast { message: 42 });
        assert!(env.expects_reply());
    }

    #[test]
    fn test_decode_topology() {
        let env = Envelope::decode(
            r#"{"src":"c1","dest":"n2","body":{"type":"topology","msg_id":1,
                "topology":{"n1":["n2"],"n2":["n1","n3"],"n3":["n2"]}}}"#,
        )
        .unwrap();

        match env.body.payload {
            Payload::Topology { topology } => {
                assert_eq!(topology["n2"], vec!["n1".to_string(), "n3".to_string()]);
                assert_eq!(topology.len(), 3);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_peer_broadcast_has_no_msg_id() {
        let env = Envelope::new("n1", "n2", Body::new(Payload::Broadcast { message: 5 }));
        let line = env.encode().unwrap();

        assert_eq!(
            line,
            r#"{"src":"n1","dest":"n2","body":{"type":"broadcast","message":5}}"#
        );
        assert!(!Envelope::decode(&line).unwrap().expects_reply());
    }

    #[test]
    fn test_reply_encoding() {
        let body = Body::new(Payload::ReadOk {
            messages: vec![1, 2, 3],
        })
        .with_msg_id(4)
        .with_in_reply_to(Some(9));
        let json: serde_json::Value =
            serde_json::from_str(&Envelope::new("n1", "c1", body).encode().unwrap()).unwrap();

        assert_eq!(json["body"]["type"], "read_ok");
        assert_eq!(json["body"]["in_reply_to"], 9);
        assert_eq!(json["body"]["msg_id"], 4);
        assert_eq!(json["body"]["messages"], serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn test_error_payload_encoding() {
        let body = Body::new(Payload::error(ErrorCode::MalformedRequest, "bad"));
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], 12);
        assert_eq!(json["text"], "bad");
    }

    #[test]
    fn test_missing_message_field_is_malformed() {
        let failure = Envelope::decode(
            r#"{"src":"c1","dest":"n1","body":{"type":"broadcast","msg_id":3}}"#,
        )
        .unwrap_err();

        assert_eq!(failure.code, ErrorCode::MalformedRequest);
        assert_eq!(failure.src.as_deref(), Some("c1"));
        assert_eq!(failure.msg_id, Some(3));

        let reply = failure.into_reply(None).unwrap();
        assert_eq!(reply.src, "n1");
        assert_eq!(reply.dest, "c1");
        assert_eq!(reply.body.in_reply_to, Some(3));
        assert!(matches!(
            reply.body.payload,
            Payload::Error { code: ErrorCode::MalformedRequest, .. }
        ));
    }

    #[test]
    fn test_mistyped_message_field_is_malformed() {
        let failure = Envelope::decode(
            r#"{"src":"c1","dest":"n1","body":{"type":"broadcast","msg_id":3,"message":"x"}}"#,
        )
        .unwrap_err();

        assert_eq!(failure.code, ErrorCode::MalformedRequest);
    }

    #[test]
    fn test_unknown_type_is_not_supported() {
        let failure = Envelope::decode(
            r#"{"src":"c1","dest":"n1","body":{"type":"cas","msg_id":1,"key":0}}"#,
        )
        .unwrap_err();

        assert_eq!(failure.code, ErrorCode::NotSupported);
        assert!(failure.text.contains("cas"));
    }

    #[test]
    fn test_garbage_is_unanswerable() {
        let failure = Envelope::decode("not json at all").unwrap_err();

        assert_eq!(failure.code, ErrorCode::MalformedRequest);
        assert!(failure.into_reply(Some("n1")).is_none());
    }

    #[test]
    fn test_reply_classification() {
        assert!(Payload::BroadcastOk.is_reply());
        assert!(Payload::error(ErrorCode::Crash, "boom").is_reply());
        assert!(!Payload::Read.is_reply());
        assert_eq!(Payload::Generate.kind(), "generate");
    }
}
