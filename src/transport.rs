//! Seam between the broadcast core and the message transport
//!
//! The core never touches sockets or stdio directly. Everything it needs
//! from the outside world goes through [`Transport`].

use std::future::Future;

use crate::message::{Body, Envelope, NodeId, Payload};
use crate::Result;

/// Message delivery and cluster membership as seen by one node
pub trait Transport: Send + Sync + 'static {
    /// Identifier of the local node
    fn node_id(&self) -> &str;

    /// Every cluster member known to the transport, possibly including self
    fn peers(&self) -> &[NodeId];

    /// Best-effort asynchronous delivery of `body` to `dest`.
    ///
    /// An error only means the transport gave up on this attempt; callers
    /// log it and move on.
    fn send(&self, dest: &str, body: Body) -> impl Future<Output = Result<()>> + Send;

    /// Answer `request` with `payload`, correlating through `in_reply_to`
    fn reply(&self, request: &Envelope, payload: Payload) -> impl Future<Output = Result<()>> + Send;
}
